pub mod admin;
pub mod handlers;
pub mod keyboards;
pub mod membership;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use teloxide::prelude::*;
use tracing::info;

use crate::config::Config;
use crate::error::AppResult;
use crate::ledger::LedgerRepository;
use session::SessionStore;

/// Minimum interval between messages from one user.
const MESSAGE_THROTTLE: Duration = Duration::from_secs(2);

/// Shared state injected into every handler.
pub struct BotContext {
    pub config: Arc<Config>,
    pub repo: Arc<LedgerRepository>,
    pub sessions: SessionStore,
    /// Used to build referral deep links.
    pub bot_username: String,
}

impl BotContext {
    pub async fn new(
        bot: &Bot,
        config: Arc<Config>,
        repo: Arc<LedgerRepository>,
    ) -> AppResult<Self> {
        let me = bot.get_me().await?;
        Ok(Self {
            config,
            repo,
            sessions: SessionStore::new(MESSAGE_THROTTLE),
            bot_username: me.username().to_string(),
        })
    }
}

/// Long-polling dispatcher. Blocks until shutdown.
pub async fn run(bot: Bot, ctx: Arc<BotContext>) {
    info!("🤖 @{} is listening for updates", ctx.bot_username);

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<handlers::Command>()
                .endpoint(handlers::handle_command),
        )
        .branch(Update::filter_message().endpoint(handlers::handle_message))
        .branch(Update::filter_callback_query().endpoint(admin::handle_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![ctx])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}
