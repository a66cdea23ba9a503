use std::sync::Arc;

use tracing::info;

use metacore_airdrop::bootstrap;
use metacore_airdrop::chain::bep20::Bep20Client;
use metacore_airdrop::chain::TokenClient;
use metacore_airdrop::config::Config;
use metacore_airdrop::ledger::LedgerRepository;
use metacore_airdrop::settlement::{Janitor, SettlementWorker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    bootstrap::init_tracing();
    info!("🚀 Starting MetaCore settlement worker");

    let config = Arc::new(Config::from_env()?);
    let pool = bootstrap::init_pool(&config.database_url).await?;
    let repo = Arc::new(LedgerRepository::new(pool));

    let chain: Arc<dyn TokenClient> = Arc::new(Bep20Client::connect(&config).await?);
    let worker = SettlementWorker::new(repo.clone(), chain.clone(), &config);
    let janitor = Janitor::new(repo, chain, &config);

    if config.settlement_run_once {
        // cron-style invocation: one batch, one janitor sweep, exit
        let outcome = worker.run_batch().await?;
        let resolved = janitor.sweep().await?;
        info!(
            "✓ Single pass done: {} scanned, {} paid, {} failed, {} skipped, {} stale resolved",
            outcome.scanned, outcome.paid, outcome.failed, outcome.skipped, resolved
        );
        return Ok(());
    }

    tokio::select! {
        _ = worker.run_loop() => {}
        _ = janitor.run_loop() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("👋 Shutting down");
        }
    }
    Ok(())
}
