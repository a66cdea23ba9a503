use sqlx::migrate::MigrateError;
use thiserror::Error;

use crate::ledger::models::WithdrawalStatus;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Telegram error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Balance/withdrawal bookkeeping errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: String, available: String },

    #[error("Invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: WithdrawalStatus,
        to: WithdrawalStatus,
    },

    #[error("User not found: {0}")]
    UserNotFound(i64),

    #[error("Withdrawal not found: {0}")]
    WithdrawalNotFound(i64),

    #[error("Withdrawal {0} no longer in the expected status")]
    StatusConflict(i64),

    #[error("Unknown setting key: {0}")]
    UnknownSetting(String),
}

/// Token-contract / node interaction errors
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Node connection failed: {0}")]
    Connect(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    #[error("Amount not representable in base units: {0}")]
    InvalidAmount(String),

    #[error("Transfer submission failed: {0}")]
    Submit(String),

    #[error("Confirmation timed out for tx {tx_hash}")]
    ConfirmationTimeout { tx_hash: String },

    #[error("Transfer reverted on-chain: tx {tx_hash}")]
    Reverted { tx_hash: String },

    #[error("Node query failed: {0}")]
    Query(String),
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {error:?}"))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("{error:?}"))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
