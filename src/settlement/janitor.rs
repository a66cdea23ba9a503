//! Stuck-withdrawal janitor. A row left in `processing` past the staleness
//! window means a worker crashed or hung mid-transfer; the janitor is the
//! only forward-progress guarantee for such rows.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use super::SettlementLedger;
use crate::chain::{TokenClient, TxStatus};
use crate::config::Config;
use crate::error::AppResult;
use crate::ledger::Withdrawal;

pub struct Janitor {
    repo: Arc<dyn SettlementLedger>,
    chain: Arc<dyn TokenClient>,
    stale_after: chrono::Duration,
    poll_interval: Duration,
}

impl Janitor {
    pub fn new(repo: Arc<dyn SettlementLedger>, chain: Arc<dyn TokenClient>, config: &Config) -> Self {
        Self {
            repo,
            chain,
            stale_after: chrono::Duration::minutes(config.stale_after_minutes),
            poll_interval: Duration::from_secs(config.settlement_poll_secs),
        }
    }

    pub async fn run_loop(&self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep().await {
                error!("❌ Janitor sweep failed: {}", e);
            }
        }
    }

    /// Resolve every withdrawal stuck in `processing` past the window.
    ///
    /// A row that recorded a tx hash before the crash is reconciled against
    /// the chain first: a confirmed transfer becomes `paid`, never a
    /// refund. Only rows with no hash, or whose transaction the chain does
    /// not know, are presumed dead and refunded.
    pub async fn sweep(&self) -> AppResult<usize> {
        let cutoff = Utc::now() - self.stale_after;
        let stale = self.repo.list_stale_processing(cutoff).await?;
        if stale.is_empty() {
            return Ok(0);
        }

        info!("🧹 Janitor found {} stale withdrawals", stale.len());
        let mut resolved = 0usize;
        for withdrawal in stale {
            match self.resolve(&withdrawal).await {
                Ok(()) => resolved += 1,
                Err(e) => error!("Janitor could not resolve #{}: {}", withdrawal.id, e),
            }
        }
        Ok(resolved)
    }

    async fn resolve(&self, withdrawal: &Withdrawal) -> AppResult<()> {
        if let Some(tx_hash) = withdrawal.tx_hash.as_deref() {
            match self.chain.receipt_status(tx_hash).await {
                Ok(Some(TxStatus::Confirmed)) => {
                    info!(
                        "Withdrawal #{} actually confirmed on-chain (tx {}), marking paid",
                        withdrawal.id, tx_hash
                    );
                    return self.repo.mark_paid(withdrawal.id, tx_hash).await;
                }
                Ok(Some(TxStatus::Reverted)) => {
                    self.repo
                        .fail_with_refund(
                            withdrawal.id,
                            "Stale transfer found reverted on-chain",
                            Some(tx_hash),
                        )
                        .await?;
                    return Ok(());
                }
                Ok(None) => {
                    // unmined past the window: presumed dropped
                }
                Err(e) => {
                    // cannot reach the chain; keep the row for the next sweep
                    warn!(
                        "Receipt lookup for stale #{} failed, retrying later: {}",
                        withdrawal.id, e
                    );
                    return Ok(());
                }
            }
        }

        let refunded = self
            .repo
            .fail_with_refund(
                withdrawal.id,
                "Stuck in processing past the staleness window",
                None,
            )
            .await?;
        if refunded {
            info!("↩️ Stale withdrawal #{} failed and refunded", withdrawal.id);
        }
        Ok(())
    }
}

/// Staleness predicate, kept separate from the clock for testing.
pub fn is_stale(
    processed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: chrono::Duration,
) -> bool {
    match processed_at {
        Some(t) => now - t > window,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::ledger::WithdrawalStatus;
    use crate::settlement::testing::*;
    use rust_decimal_macros::dec;

    const ADDR: &str = "0x742d35Cc6634C0532925a3b8D4C0C8b3C2e1e1e1";

    fn janitor(ledger: Arc<FakeLedger>, chain: Arc<FakeChain>) -> Janitor {
        Janitor {
            repo: ledger,
            chain,
            stale_after: chrono::Duration::minutes(10),
            poll_interval: Duration::from_secs(60),
        }
    }

    fn stuck(id: i64, tx_hash: Option<&str>) -> Withdrawal {
        withdrawal(id, ADDR, WithdrawalStatus::Processing, tx_hash)
    }

    #[tokio::test]
    async fn confirmed_stale_rows_become_paid_not_refunded() {
        let ledger = Arc::new(FakeLedger {
            stale: vec![stuck(1, Some("0xaaa"))],
            ..Default::default()
        });
        let chain = Arc::new(FakeChain {
            treasury: dec!(0),
            receipts: HashMap::from([("0xaaa".to_string(), ReceiptScript::Confirmed)]),
            ..Default::default()
        });

        let resolved = janitor(ledger.clone(), chain).sweep().await.unwrap();

        assert_eq!(resolved, 1);
        let calls = ledger.calls();
        assert!(calls.iter().any(|c| c == "paid #1 0xaaa"));
        assert!(!calls.iter().any(|c| c.starts_with("refund")));
    }

    #[tokio::test]
    async fn reverted_stale_rows_are_refunded() {
        let ledger = Arc::new(FakeLedger {
            stale: vec![stuck(2, Some("0xbbb"))],
            ..Default::default()
        });
        let chain = Arc::new(FakeChain {
            receipts: HashMap::from([("0xbbb".to_string(), ReceiptScript::Reverted)]),
            ..Default::default()
        });

        janitor(ledger.clone(), chain).sweep().await.unwrap();

        assert!(ledger.calls().iter().any(|c| c.starts_with("refund #2")));
    }

    #[tokio::test]
    async fn hashless_stale_rows_are_presumed_dead_and_refunded() {
        let ledger = Arc::new(FakeLedger {
            stale: vec![stuck(3, None)],
            ..Default::default()
        });
        let chain = Arc::new(FakeChain::default());

        janitor(ledger.clone(), chain.clone()).sweep().await.unwrap();

        assert!(ledger.calls().iter().any(|c| c.starts_with("refund #3")));
        // no hash, so there was nothing to look up
        assert!(chain.calls().is_empty());
    }

    #[tokio::test]
    async fn unmined_hash_past_the_window_is_refunded() {
        let ledger = Arc::new(FakeLedger {
            stale: vec![stuck(4, Some("0xccc"))],
            ..Default::default()
        });
        // no receipt script: the chain never saw the transaction
        let chain = Arc::new(FakeChain::default());

        janitor(ledger.clone(), chain).sweep().await.unwrap();

        assert!(ledger.calls().iter().any(|c| c.starts_with("refund #4")));
    }

    #[tokio::test]
    async fn unreachable_chain_defers_resolution_to_the_next_sweep() {
        let ledger = Arc::new(FakeLedger {
            stale: vec![stuck(5, Some("0xddd"))],
            ..Default::default()
        });
        let chain = Arc::new(FakeChain {
            receipts: HashMap::from([("0xddd".to_string(), ReceiptScript::Unreachable)]),
            ..Default::default()
        });

        janitor(ledger.clone(), chain).sweep().await.unwrap();

        let calls = ledger.calls();
        assert!(!calls.iter().any(|c| c.starts_with("refund")));
        assert!(!calls.iter().any(|c| c.starts_with("paid")));
    }

    #[test]
    fn fresh_rows_are_not_stale() {
        let now = Utc::now();
        let window = chrono::Duration::minutes(10);
        assert!(!is_stale(Some(now - chrono::Duration::minutes(5)), now, window));
        assert!(!is_stale(Some(now), now, window));
    }

    #[test]
    fn old_rows_are_stale() {
        let now = Utc::now();
        let window = chrono::Duration::minutes(10);
        assert!(is_stale(Some(now - chrono::Duration::minutes(11)), now, window));
        assert!(is_stale(Some(now - chrono::Duration::hours(2)), now, window));
    }

    #[test]
    fn missing_timestamp_is_never_stale() {
        let now = Utc::now();
        assert!(!is_stale(None, now, chrono::Duration::minutes(10)));
    }
}
