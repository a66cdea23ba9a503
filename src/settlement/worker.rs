//! Batch settlement of approved withdrawals against the token contract.
//!
//! Withdrawals are processed strictly sequentially: one transfer in flight
//! at a time, a fixed delay between submissions, and one record's failure
//! never aborts the batch.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{error, info, warn};

use super::SettlementLedger;
use crate::chain::{TokenClient, TxStatus};
use crate::config::Config;
use crate::error::{AppResult, ChainError};
use crate::ledger::Withdrawal;
use crate::validation;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub scanned: usize,
    pub paid: usize,
    pub failed: usize,
    /// Claimed by another worker run, or left in flight for the janitor.
    pub skipped: usize,
}

pub struct SettlementWorker {
    repo: Arc<dyn SettlementLedger>,
    chain: Arc<dyn TokenClient>,
    batch_size: i64,
    poll_interval: Duration,
    transfer_delay: Duration,
}

impl SettlementWorker {
    pub fn new(repo: Arc<dyn SettlementLedger>, chain: Arc<dyn TokenClient>, config: &Config) -> Self {
        Self {
            repo,
            chain,
            batch_size: config.settlement_batch_size,
            poll_interval: Duration::from_secs(config.settlement_poll_secs),
            transfer_delay: Duration::from_secs(config.transfer_delay_secs),
        }
    }

    /// Loop mode: one batch per poll interval, forever.
    pub async fn run_loop(&self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_batch().await {
                error!("❌ Settlement batch failed: {}", e);
            }
        }
    }

    /// One settlement pass over the approved queue, oldest first.
    pub async fn run_batch(&self) -> AppResult<BatchOutcome> {
        let batch = self.repo.list_approved_withdrawals(self.batch_size).await?;
        let mut outcome = BatchOutcome {
            scanned: batch.len(),
            ..Default::default()
        };
        if batch.is_empty() {
            return Ok(outcome);
        }

        let treasury = self.chain.treasury_balance().await.unwrap_or_else(|e| {
            warn!("Treasury balance query failed: {}", e);
            Decimal::ZERO
        });
        let total: Decimal = batch.iter().map(|w| w.amount).sum();
        if let Some(short) = shortfall(total, treasury) {
            // log-only; each record fails individually if uncovered
            warn!(
                "⚠️ Treasury short by {} {}: batch needs {}, holds {}",
                short,
                self.chain.token_symbol(),
                total,
                treasury
            );
        }
        info!(
            "🔄 Settling {} withdrawals totalling {} {}",
            batch.len(),
            total,
            self.chain.token_symbol()
        );

        for withdrawal in batch {
            match self.settle_one(&withdrawal).await {
                Ok(Settled::Paid) => outcome.paid += 1,
                Ok(Settled::Failed) => outcome.failed += 1,
                Ok(Settled::Skipped) => outcome.skipped += 1,
                Err(e) => {
                    // database trouble; leave the row for the janitor
                    error!("Settlement of #{} errored: {}", withdrawal.id, e);
                    outcome.skipped += 1;
                }
            }
            tokio::time::sleep(self.transfer_delay).await;
        }

        info!(
            "✓ Batch done: {} paid, {} failed, {} skipped",
            outcome.paid, outcome.failed, outcome.skipped
        );
        Ok(outcome)
    }

    async fn settle_one(&self, withdrawal: &Withdrawal) -> AppResult<Settled> {
        // The conditional claim is what makes overlapping worker runs safe:
        // only one of them moves the row to processing.
        if !self.repo.claim_for_processing(withdrawal.id).await? {
            info!("Withdrawal #{} already claimed, skipping", withdrawal.id);
            return Ok(Settled::Skipped);
        }

        let treasury = self.chain.treasury_balance().await.unwrap_or(Decimal::ZERO);
        if let Err(reason) = precheck(&withdrawal.to_address, withdrawal.amount, treasury) {
            warn!("Withdrawal #{} precheck failed: {}", withdrawal.id, reason);
            self.repo
                .fail_with_refund(withdrawal.id, &reason, None)
                .await?;
            return Ok(Settled::Failed);
        }

        match self
            .chain
            .transfer(&withdrawal.to_address, withdrawal.amount)
            .await
        {
            Ok(receipt) => {
                self.repo.mark_paid(withdrawal.id, &receipt.tx_hash).await?;
                Ok(Settled::Paid)
            }
            Err(ChainError::ConfirmationTimeout { tx_hash }) => {
                self.reconcile_timeout(withdrawal, &tx_hash).await
            }
            Err(ChainError::Reverted { tx_hash }) => {
                self.repo
                    .fail_with_refund(
                        withdrawal.id,
                        "Transfer reverted on-chain",
                        Some(&tx_hash),
                    )
                    .await?;
                Ok(Settled::Failed)
            }
            Err(e) => {
                self.repo
                    .fail_with_refund(withdrawal.id, &format!("Transfer failed: {e}"), None)
                    .await?;
                Ok(Settled::Failed)
            }
        }
    }

    /// A timed-out confirmation is not a failure: the transfer may have
    /// landed after we stopped waiting. Re-query the receipt before
    /// deciding; if the chain still has no answer, record the hash and
    /// leave the row in `processing` for the janitor to resolve.
    async fn reconcile_timeout(&self, withdrawal: &Withdrawal, tx_hash: &str) -> AppResult<Settled> {
        match self.chain.receipt_status(tx_hash).await {
            Ok(Some(TxStatus::Confirmed)) => {
                info!("Withdrawal #{} confirmed after timeout", withdrawal.id);
                self.repo.mark_paid(withdrawal.id, tx_hash).await?;
                Ok(Settled::Paid)
            }
            Ok(Some(TxStatus::Reverted)) => {
                self.repo
                    .fail_with_refund(
                        withdrawal.id,
                        "Transfer reverted on-chain",
                        Some(tx_hash),
                    )
                    .await?;
                Ok(Settled::Failed)
            }
            Ok(None) | Err(_) => {
                warn!(
                    "Withdrawal #{} still unresolved (tx {}), leaving in flight",
                    withdrawal.id, tx_hash
                );
                self.repo.record_tx_hash(withdrawal.id, tx_hash).await?;
                Ok(Settled::Skipped)
            }
        }
    }
}

enum Settled {
    Paid,
    Failed,
    Skipped,
}

/// Amount the treasury is missing to cover the batch, if any.
pub fn shortfall(batch_total: Decimal, treasury: Decimal) -> Option<Decimal> {
    (batch_total > treasury).then(|| batch_total - treasury)
}

/// Per-record validation before any transfer is attempted.
pub fn precheck(to_address: &str, amount: Decimal, treasury: Decimal) -> Result<(), String> {
    if !validation::is_valid_wallet_address(to_address) {
        return Err(format!("Invalid destination address: {to_address}"));
    }
    if amount > treasury {
        return Err(format!(
            "Treasury balance {treasury} does not cover {amount}"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::ledger::WithdrawalStatus;
    use crate::settlement::testing::*;
    use rust_decimal_macros::dec;

    const GOOD_ADDR: &str = "0x742d35Cc6634C0532925a3b8D4C0C8b3C2e1e1e1";
    const ADDR_B: &str = "0x742d35Cc6634C0532925a3b8D4C0C8b3C2e1e1e2";
    const ADDR_C: &str = "0x742d35Cc6634C0532925a3b8D4C0C8b3C2e1e1e3";

    fn worker(ledger: Arc<FakeLedger>, chain: Arc<FakeChain>) -> SettlementWorker {
        SettlementWorker {
            repo: ledger,
            chain,
            batch_size: 10,
            poll_interval: Duration::from_secs(60),
            transfer_delay: Duration::ZERO,
        }
    }

    fn approved(id: i64, to: &str) -> Withdrawal {
        withdrawal(id, to, WithdrawalStatus::Approved, None)
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_batch() {
        let ledger = Arc::new(FakeLedger {
            approved: vec![approved(1, GOOD_ADDR), approved(2, ADDR_B), approved(3, ADDR_C)],
            ..Default::default()
        });
        let chain = Arc::new(FakeChain {
            treasury: dec!(1_000_000),
            transfers: HashMap::from([
                (GOOD_ADDR.to_string(), TransferScript::SubmitError),
                (ADDR_B.to_string(), TransferScript::Confirm("0xb0b")),
                (ADDR_C.to_string(), TransferScript::Revert("0xccc")),
            ]),
            ..Default::default()
        });

        let outcome = worker(ledger.clone(), chain).run_batch().await.unwrap();

        assert_eq!(
            outcome,
            BatchOutcome { scanned: 3, paid: 1, failed: 2, skipped: 0 }
        );
        let calls = ledger.calls();
        assert!(calls.iter().any(|c| c == "paid #2 0xb0b"));
        assert!(calls.iter().any(|c| c.starts_with("refund #1")));
        assert!(calls.iter().any(|c| c.starts_with("refund #3")));
    }

    #[tokio::test]
    async fn confirmed_transfer_is_marked_paid() {
        let ledger = Arc::new(FakeLedger {
            approved: vec![approved(4, GOOD_ADDR)],
            ..Default::default()
        });
        let chain = Arc::new(FakeChain {
            treasury: dec!(1_000_000),
            transfers: HashMap::from([(
                GOOD_ADDR.to_string(),
                TransferScript::Confirm("0xabc"),
            )]),
            ..Default::default()
        });

        let outcome = worker(ledger.clone(), chain).run_batch().await.unwrap();

        assert_eq!(outcome.paid, 1);
        assert_eq!(ledger.calls(), vec!["claim #4", "paid #4 0xabc"]);
    }

    #[tokio::test]
    async fn timeout_with_confirmed_receipt_is_paid_not_refunded() {
        let ledger = Arc::new(FakeLedger {
            approved: vec![approved(5, GOOD_ADDR)],
            ..Default::default()
        });
        let chain = Arc::new(FakeChain {
            treasury: dec!(1_000_000),
            transfers: HashMap::from([(
                GOOD_ADDR.to_string(),
                TransferScript::Timeout("0xaaa"),
            )]),
            receipts: HashMap::from([("0xaaa".to_string(), ReceiptScript::Confirmed)]),
            ..Default::default()
        });

        let outcome = worker(ledger.clone(), chain).run_batch().await.unwrap();

        assert_eq!(outcome.paid, 1);
        let calls = ledger.calls();
        assert!(calls.iter().any(|c| c == "paid #5 0xaaa"));
        assert!(!calls.iter().any(|c| c.starts_with("refund")));
    }

    #[tokio::test]
    async fn timeout_with_reverted_receipt_refunds() {
        let ledger = Arc::new(FakeLedger {
            approved: vec![approved(6, GOOD_ADDR)],
            ..Default::default()
        });
        let chain = Arc::new(FakeChain {
            treasury: dec!(1_000_000),
            transfers: HashMap::from([(
                GOOD_ADDR.to_string(),
                TransferScript::Timeout("0xaaa"),
            )]),
            receipts: HashMap::from([("0xaaa".to_string(), ReceiptScript::Reverted)]),
            ..Default::default()
        });

        let outcome = worker(ledger.clone(), chain).run_batch().await.unwrap();

        assert_eq!(outcome.failed, 1);
        assert!(ledger.calls().iter().any(|c| c.starts_with("refund #6")));
    }

    #[tokio::test]
    async fn unresolved_timeout_records_hash_and_stays_in_flight() {
        let ledger = Arc::new(FakeLedger {
            approved: vec![approved(7, GOOD_ADDR)],
            ..Default::default()
        });
        let chain = Arc::new(FakeChain {
            treasury: dec!(1_000_000),
            transfers: HashMap::from([(
                GOOD_ADDR.to_string(),
                TransferScript::Timeout("0xaaa"),
            )]),
            // no receipt script: the chain has no answer yet
            ..Default::default()
        });

        let outcome = worker(ledger.clone(), chain).run_batch().await.unwrap();

        assert_eq!(outcome.skipped, 1);
        let calls = ledger.calls();
        assert!(calls.iter().any(|c| c == "record #7 0xaaa"));
        assert!(!calls.iter().any(|c| c.starts_with("refund")));
        assert!(!calls.iter().any(|c| c.starts_with("paid")));
    }

    #[tokio::test]
    async fn already_claimed_rows_skip_the_transfer() {
        let ledger = Arc::new(FakeLedger {
            approved: vec![approved(8, GOOD_ADDR)],
            deny_claims: vec![8],
            ..Default::default()
        });
        let chain = Arc::new(FakeChain {
            treasury: dec!(1_000_000),
            ..Default::default()
        });

        let outcome = worker(ledger.clone(), chain.clone()).run_batch().await.unwrap();

        assert_eq!(outcome.skipped, 1);
        assert!(chain.calls().is_empty());
    }

    #[tokio::test]
    async fn uncovered_amount_fails_before_any_transfer() {
        let ledger = Arc::new(FakeLedger {
            approved: vec![approved(9, GOOD_ADDR)],
            ..Default::default()
        });
        let chain = Arc::new(FakeChain {
            treasury: dec!(10), // well below the 5000 withdrawal
            ..Default::default()
        });

        let outcome = worker(ledger.clone(), chain.clone()).run_batch().await.unwrap();

        assert_eq!(outcome.failed, 1);
        assert!(ledger.calls().iter().any(|c| c.starts_with("refund #9")));
        assert!(chain.calls().is_empty());
    }

    #[test]
    fn shortfall_only_when_underfunded() {
        assert_eq!(shortfall(dec!(100), dec!(250)), None);
        assert_eq!(shortfall(dec!(100), dec!(100)), None);
        assert_eq!(shortfall(dec!(300), dec!(250)), Some(dec!(50)));
    }

    #[test]
    fn precheck_accepts_covered_valid_destination() {
        assert!(precheck(GOOD_ADDR, dec!(100), dec!(500)).is_ok());
    }

    #[test]
    fn precheck_rejects_bad_address() {
        let err = precheck("not-an-address", dec!(100), dec!(500)).unwrap_err();
        assert!(err.contains("Invalid destination address"));
    }

    #[test]
    fn precheck_rejects_uncovered_amount() {
        let err = precheck(GOOD_ADDR, dec!(600), dec!(500)).unwrap_err();
        assert!(err.contains("does not cover"));
    }
}
