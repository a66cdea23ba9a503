use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};

use crate::error::{AppResult, LedgerError};

/// Withdrawal status state machine
///
/// Valid transitions:
/// - Pending → Approved, Rejected
/// - Approved → Processing
/// - Processing → Paid, Failed
/// - Terminal states (Paid, Failed, Rejected) → NO TRANSITIONS ALLOWED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "withdrawal_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Processing,
    Paid,
    Failed,
    Rejected,
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Approved => "approved",
            WithdrawalStatus::Processing => "processing",
            WithdrawalStatus::Paid => "paid",
            WithdrawalStatus::Failed => "failed",
            WithdrawalStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WithdrawalStatus::Paid | WithdrawalStatus::Failed | WithdrawalStatus::Rejected
        )
    }

    pub fn can_transition(from: WithdrawalStatus, to: WithdrawalStatus) -> bool {
        let allowed: &[WithdrawalStatus] = match from {
            WithdrawalStatus::Pending => {
                &[WithdrawalStatus::Approved, WithdrawalStatus::Rejected]
            }
            WithdrawalStatus::Approved => &[WithdrawalStatus::Processing],
            WithdrawalStatus::Processing => {
                &[WithdrawalStatus::Paid, WithdrawalStatus::Failed]
            }
            // Terminal states - no transitions allowed
            WithdrawalStatus::Paid | WithdrawalStatus::Failed | WithdrawalStatus::Rejected => &[],
        };
        allowed.contains(&to)
    }

    pub fn validate_transition(
        from: WithdrawalStatus,
        to: WithdrawalStatus,
    ) -> AppResult<()> {
        if Self::can_transition(from, to) {
            Ok(())
        } else {
            Err(LedgerError::InvalidTransition { from, to }.into())
        }
    }
}

/// User entity - one row per Telegram account
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    /// Telegram user id, assigned by Telegram, not by us.
    pub id: i64,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub telegram_handle: Option<String>,
    pub twitter_handle: Option<String>,
    pub wallet_address: Option<String>,
    pub balance: Decimal,
    pub joined_all_groups: bool,
    pub group_bonus_received: bool,
    /// Per-group membership snapshot keyed by chat id.
    pub group_status: sqlx::types::Json<HashMap<String, bool>>,
    pub invited_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Onboarding is complete once both handles and the wallet are recorded.
    pub fn is_registered(&self) -> bool {
        self.telegram_handle.is_some()
            && self.twitter_handle.is_some()
            && self.wallet_address.is_some()
    }
}

/// Withdrawal entity - the balance is debited when this row is created
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Withdrawal {
    pub id: i64,
    pub user_id: i64,
    pub amount: Decimal,
    pub to_address: String,
    pub status: WithdrawalStatus,
    pub tx_hash: Option<String>,
    pub network: String,
    pub admin_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Tunable campaign parameters, single row keyed id = 1
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Settings {
    pub id: i32,
    pub signup_bonus: Decimal,
    pub referral_bonus: Decimal,
    pub group_join_bonus: Decimal,
    pub min_withdrawal: Decimal,
    pub token_price_usd: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Append-only balance movement record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TransactionEntry {
    pub id: i64,
    pub user_id: i64,
    pub kind: String,
    pub amount: Decimal,
    pub description: String,
    pub reference_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Transaction kind labels used in the `transactions` table
pub mod tx_kind {
    pub const SIGNUP: &str = "signup_bonus";
    pub const REFERRAL: &str = "referral_bonus";
    pub const GROUP_JOIN: &str = "group_join_bonus";
    pub const WITHDRAWAL: &str = "withdrawal";
    pub const REFUND: &str = "withdrawal_refund";
    pub const ADMIN_CREDIT: &str = "admin_credit";
}

/// Aggregate counters for the admin dashboard
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AdminStats {
    pub total_users: i64,
    pub registered_users: i64,
    pub total_balance: Decimal,
    pub total_referrals: i64,
    pub pending_withdrawals: i64,
    pub paid_withdrawals: i64,
    pub paid_amount: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_allowed() {
        use WithdrawalStatus::*;
        assert!(WithdrawalStatus::can_transition(Pending, Approved));
        assert!(WithdrawalStatus::can_transition(Pending, Rejected));
        assert!(WithdrawalStatus::can_transition(Approved, Processing));
        assert!(WithdrawalStatus::can_transition(Processing, Paid));
        assert!(WithdrawalStatus::can_transition(Processing, Failed));
    }

    #[test]
    fn terminal_states_frozen() {
        use WithdrawalStatus::*;
        for terminal in [Paid, Failed, Rejected] {
            for to in [Pending, Approved, Processing, Paid, Failed, Rejected] {
                assert!(!WithdrawalStatus::can_transition(terminal, to));
            }
        }
        assert!(Paid.is_terminal());
        assert!(Failed.is_terminal());
        assert!(Rejected.is_terminal());
        assert!(!Processing.is_terminal());
    }

    #[test]
    fn skipping_states_rejected() {
        use WithdrawalStatus::*;
        // pending cannot jump straight to paid or processing
        assert!(!WithdrawalStatus::can_transition(Pending, Processing));
        assert!(!WithdrawalStatus::can_transition(Pending, Paid));
        // approved cannot be re-rejected, only claimed for processing
        assert!(!WithdrawalStatus::can_transition(Approved, Rejected));
        assert!(!WithdrawalStatus::can_transition(Approved, Paid));
        assert!(WithdrawalStatus::validate_transition(Pending, Paid).is_err());
    }

    #[test]
    fn registration_requires_all_three_fields() {
        let mut user = User {
            id: 1,
            username: None,
            full_name: None,
            telegram_handle: Some("meta_fan".into()),
            twitter_handle: Some("meta_fan".into()),
            wallet_address: None,
            balance: Decimal::ZERO,
            joined_all_groups: false,
            group_bonus_received: false,
            group_status: sqlx::types::Json(Default::default()),
            invited_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(!user.is_registered());
        user.wallet_address = Some("0x0000000000000000000000000000000000000001".into());
        assert!(user.is_registered());
    }
}
