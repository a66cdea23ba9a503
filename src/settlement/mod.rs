pub mod janitor;
pub mod worker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppResult;
use crate::ledger::{LedgerRepository, Withdrawal};

pub use janitor::Janitor;
pub use worker::SettlementWorker;

/// The slice of the ledger the settlement side touches. A trait for the
/// same reason `TokenClient` is one: the worker and janitor decision logic
/// runs against a fake ledger in tests, no database needed.
#[async_trait]
pub trait SettlementLedger: Send + Sync {
    async fn list_approved_withdrawals(&self, limit: i64) -> AppResult<Vec<Withdrawal>>;

    /// Conditional approved → processing claim; `false` means another
    /// invocation owns the record.
    async fn claim_for_processing(&self, withdrawal_id: i64) -> AppResult<bool>;

    async fn mark_paid(&self, withdrawal_id: i64, tx_hash: &str) -> AppResult<()>;

    async fn fail_with_refund(
        &self,
        withdrawal_id: i64,
        note: &str,
        tx_hash: Option<&str>,
    ) -> AppResult<bool>;

    async fn record_tx_hash(&self, withdrawal_id: i64, tx_hash: &str) -> AppResult<()>;

    async fn list_stale_processing(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Withdrawal>>;
}

#[async_trait]
impl SettlementLedger for LedgerRepository {
    async fn list_approved_withdrawals(&self, limit: i64) -> AppResult<Vec<Withdrawal>> {
        LedgerRepository::list_approved_withdrawals(self, limit).await
    }

    async fn claim_for_processing(&self, withdrawal_id: i64) -> AppResult<bool> {
        LedgerRepository::claim_for_processing(self, withdrawal_id).await
    }

    async fn mark_paid(&self, withdrawal_id: i64, tx_hash: &str) -> AppResult<()> {
        LedgerRepository::mark_paid(self, withdrawal_id, tx_hash).await
    }

    async fn fail_with_refund(
        &self,
        withdrawal_id: i64,
        note: &str,
        tx_hash: Option<&str>,
    ) -> AppResult<bool> {
        LedgerRepository::fail_with_refund(self, withdrawal_id, note, tx_hash).await
    }

    async fn record_tx_hash(&self, withdrawal_id: i64, tx_hash: &str) -> AppResult<()> {
        LedgerRepository::record_tx_hash(self, withdrawal_id, tx_hash).await
    }

    async fn list_stale_processing(&self, cutoff: DateTime<Utc>) -> AppResult<Vec<Withdrawal>> {
        LedgerRepository::list_stale_processing(self, cutoff).await
    }
}

/// Scripted fakes shared by the worker and janitor tests.
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::SettlementLedger;
    use crate::chain::{TokenClient, TransferReceipt, TxStatus};
    use crate::config::Network;
    use crate::error::{AppResult, ChainError};
    use crate::ledger::{Withdrawal, WithdrawalStatus};

    pub fn withdrawal(
        id: i64,
        to: &str,
        status: WithdrawalStatus,
        tx_hash: Option<&str>,
    ) -> Withdrawal {
        Withdrawal {
            id,
            user_id: 1000 + id,
            amount: dec!(5000),
            to_address: to.to_string(),
            status,
            tx_hash: tx_hash.map(str::to_string),
            network: "BSC Testnet".to_string(),
            admin_note: None,
            created_at: Utc::now() - chrono::Duration::hours(1),
            processed_at: Some(Utc::now() - chrono::Duration::minutes(30)),
        }
    }

    /// What the fake chain does when a given address is paid.
    pub enum TransferScript {
        Confirm(&'static str),
        Revert(&'static str),
        Timeout(&'static str),
        SubmitError,
    }

    /// What a receipt lookup for a given tx hash reports.
    pub enum ReceiptScript {
        Confirmed,
        Reverted,
        Unknown,
        Unreachable,
    }

    #[derive(Default)]
    pub struct FakeChain {
        pub treasury: Decimal,
        /// Keyed by destination address.
        pub transfers: HashMap<String, TransferScript>,
        /// Keyed by tx hash; missing hashes report unmined.
        pub receipts: HashMap<String, ReceiptScript>,
        pub log: Mutex<Vec<String>>,
    }

    impl FakeChain {
        pub fn calls(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TokenClient for FakeChain {
        fn network(&self) -> Network {
            Network::Testnet
        }

        fn token_symbol(&self) -> &str {
            "MCT"
        }

        async fn treasury_balance(&self) -> Result<Decimal, ChainError> {
            Ok(self.treasury)
        }

        async fn transfer(
            &self,
            to: &str,
            _amount: Decimal,
        ) -> Result<TransferReceipt, ChainError> {
            self.log.lock().unwrap().push(format!("transfer {to}"));
            match self.transfers.get(to) {
                Some(TransferScript::Confirm(hash)) => Ok(TransferReceipt {
                    tx_hash: hash.to_string(),
                }),
                Some(TransferScript::Revert(hash)) => Err(ChainError::Reverted {
                    tx_hash: hash.to_string(),
                }),
                Some(TransferScript::Timeout(hash)) => Err(ChainError::ConfirmationTimeout {
                    tx_hash: hash.to_string(),
                }),
                Some(TransferScript::SubmitError) | None => {
                    Err(ChainError::Submit("node unreachable".to_string()))
                }
            }
        }

        async fn receipt_status(&self, tx_hash: &str) -> Result<Option<TxStatus>, ChainError> {
            match self.receipts.get(tx_hash) {
                Some(ReceiptScript::Confirmed) => Ok(Some(TxStatus::Confirmed)),
                Some(ReceiptScript::Reverted) => Ok(Some(TxStatus::Reverted)),
                Some(ReceiptScript::Unreachable) => {
                    Err(ChainError::Query("node unreachable".to_string()))
                }
                Some(ReceiptScript::Unknown) | None => Ok(None),
            }
        }
    }

    /// In-memory ledger recording every settlement call it receives.
    #[derive(Default)]
    pub struct FakeLedger {
        pub approved: Vec<Withdrawal>,
        pub stale: Vec<Withdrawal>,
        /// Ids whose claim reports "another invocation owns this".
        pub deny_claims: Vec<i64>,
        pub log: Mutex<Vec<String>>,
    }

    impl FakeLedger {
        pub fn calls(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SettlementLedger for FakeLedger {
        async fn list_approved_withdrawals(&self, limit: i64) -> AppResult<Vec<Withdrawal>> {
            Ok(self.approved.iter().take(limit as usize).cloned().collect())
        }

        async fn claim_for_processing(&self, withdrawal_id: i64) -> AppResult<bool> {
            self.log.lock().unwrap().push(format!("claim #{withdrawal_id}"));
            Ok(!self.deny_claims.contains(&withdrawal_id))
        }

        async fn mark_paid(&self, withdrawal_id: i64, tx_hash: &str) -> AppResult<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("paid #{withdrawal_id} {tx_hash}"));
            Ok(())
        }

        async fn fail_with_refund(
            &self,
            withdrawal_id: i64,
            note: &str,
            _tx_hash: Option<&str>,
        ) -> AppResult<bool> {
            self.log
                .lock()
                .unwrap()
                .push(format!("refund #{withdrawal_id}: {note}"));
            Ok(true)
        }

        async fn record_tx_hash(&self, withdrawal_id: i64, tx_hash: &str) -> AppResult<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("record #{withdrawal_id} {tx_hash}"));
            Ok(())
        }

        async fn list_stale_processing(
            &self,
            _cutoff: DateTime<Utc>,
        ) -> AppResult<Vec<Withdrawal>> {
            Ok(self.stale.clone())
        }
    }
}
