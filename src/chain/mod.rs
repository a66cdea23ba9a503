pub mod bep20;

use alloy::primitives::U256;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::config::Network;
use crate::error::ChainError;

/// Outcome of a confirmed transfer.
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub tx_hash: String,
}

/// Final on-chain status of a previously submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Confirmed,
    Reverted,
}

/// Token contract operations the settlement worker depends on. A trait so
/// the batch logic is testable without a node.
#[async_trait]
pub trait TokenClient: Send + Sync {
    fn network(&self) -> Network;

    fn token_symbol(&self) -> &str;

    /// Spendable token balance of the payout wallet.
    async fn treasury_balance(&self) -> Result<Decimal, ChainError>;

    /// Submit a transfer and wait for its receipt.
    ///
    /// A timeout surfaces as `ChainError::ConfirmationTimeout` carrying the
    /// tx hash, so the caller can reconcile the attempt later instead of
    /// assuming it never happened.
    async fn transfer(&self, to: &str, amount: Decimal) -> Result<TransferReceipt, ChainError>;

    /// Look up the receipt of an earlier submission. `None` means the
    /// transaction is still unmined (or was never accepted).
    async fn receipt_status(&self, tx_hash: &str) -> Result<Option<TxStatus>, ChainError>;
}

/// Convert a human amount to contract base units (`amount * 10^decimals`).
/// Fails if the amount has more fractional digits than the token carries.
pub fn to_base_units(amount: Decimal, decimals: u8) -> Result<U256, ChainError> {
    if amount <= Decimal::ZERO {
        return Err(ChainError::InvalidAmount(amount.to_string()));
    }
    if decimals > 18 {
        return Err(ChainError::InvalidAmount(format!(
            "unsupported token precision: {decimals}"
        )));
    }
    let scaled = amount
        .checked_mul(Decimal::from(10u64.pow(decimals as u32)))
        .ok_or_else(|| ChainError::InvalidAmount(amount.to_string()))?;
    if scaled.fract() != Decimal::ZERO {
        return Err(ChainError::InvalidAmount(amount.to_string()));
    }
    U256::from_str(&scaled.trunc().normalize().to_string())
        .map_err(|_| ChainError::InvalidAmount(amount.to_string()))
}

/// Convert contract base units back to a human amount.
pub fn from_base_units(units: U256, decimals: u8) -> Result<Decimal, ChainError> {
    let raw = units.to_string();
    let mut value =
        Decimal::from_str(&raw).map_err(|_| ChainError::InvalidAmount(raw.clone()))?;
    value
        .set_scale(decimals as u32)
        .map_err(|_| ChainError::InvalidAmount(raw))?;
    Ok(value.normalize())
}
