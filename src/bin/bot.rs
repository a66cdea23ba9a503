use std::sync::Arc;

use teloxide::Bot;
use tracing::info;

use metacore_airdrop::bootstrap;
use metacore_airdrop::bot::{self, BotContext};
use metacore_airdrop::config::Config;
use metacore_airdrop::ledger::LedgerRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    bootstrap::init_tracing();
    info!("🚀 Starting MetaCore airdrop bot");

    let config = Arc::new(Config::from_env()?);
    let pool = bootstrap::init_pool(&config.database_url).await?;
    let repo = Arc::new(LedgerRepository::new(pool));

    let tg = Bot::new(config.bot_token.clone());
    let ctx = Arc::new(BotContext::new(&tg, config, repo).await?);

    bot::run(tg, ctx).await;
    info!("👋 Bot stopped");
    Ok(())
}
