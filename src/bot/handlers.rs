use std::sync::Arc;

use rust_decimal::Decimal;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::error;

use super::keyboards::{self, MenuAction};
use super::membership;
use super::session::SessionState;
use super::{admin, BotContext};
use crate::error::{AppError, AppResult};
use crate::validation;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    #[command(description = "start or restart the bot")]
    Start(String),
    #[command(description = "show help")]
    Help,
    #[command(description = "admin: campaign statistics")]
    Stats,
    #[command(description = "admin: message every user")]
    Broadcast(String),
    #[command(description = "admin: look up a user by id")]
    Userinfo(String),
    #[command(description = "admin: credit balance, `<user_id> <amount>`")]
    Addbalance(String),
    #[command(description = "admin: list pending withdrawals")]
    Withdrawals,
    #[command(description = "admin: show campaign settings")]
    Settings,
    #[command(description = "admin: update a setting, `<key> <value>`")]
    Setsetting(String),
    #[command(description = "admin: connectivity check")]
    Ping,
}

pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    ctx: Arc<BotContext>,
) -> ResponseResult<()> {
    if !msg.chat.is_private() {
        return Ok(());
    }
    let Some(from) = msg.from.clone() else {
        return Ok(());
    };
    let user_id = from.id.0 as i64;

    if !ctx.sessions.allow_message(user_id) {
        bot.send_message(msg.chat.id, "⏳ Please slow down a little.")
            .await?;
        return Ok(());
    }

    let result = match cmd {
        Command::Start(payload) => start(&bot, &msg, &from, &payload, &ctx).await,
        Command::Help => help(&bot, &msg).await,
        admin_cmd => {
            if ctx.config.is_admin(user_id) {
                admin::handle_admin_command(&bot, &msg, admin_cmd, &ctx).await
            } else {
                // non-admins see the same reply as for any unknown text
                bot.send_message(msg.chat.id, "Unknown command. Use the menu below.")
                    .reply_markup(keyboards::main_menu())
                    .await?;
                Ok(())
            }
        }
    };

    report_failure(&bot, &msg, result).await
}

pub async fn handle_message(bot: Bot, msg: Message, ctx: Arc<BotContext>) -> ResponseResult<()> {
    if !msg.chat.is_private() {
        return Ok(());
    }
    let Some(from) = msg.from.clone() else {
        return Ok(());
    };
    let user_id = from.id.0 as i64;
    let Some(text) = msg.text().map(str::to_owned) else {
        return Ok(());
    };

    if !ctx.sessions.allow_message(user_id) {
        bot.send_message(msg.chat.id, "⏳ Please slow down a little.")
            .await?;
        return Ok(());
    }

    let result = dispatch_text(&bot, &msg, user_id, &text, &ctx).await;
    report_failure(&bot, &msg, result).await
}

/// Validation and transient errors must never crash the conversation; the
/// user always lands back in a known state.
async fn report_failure(bot: &Bot, msg: &Message, result: AppResult<()>) -> ResponseResult<()> {
    if let Err(e) = result {
        error!("Handler failed for chat {}: {}", msg.chat.id, e);
        if !matches!(e, AppError::Telegram(_)) {
            bot.send_message(msg.chat.id, "⚠️ Something went wrong. Please try again.")
                .reply_markup(keyboards::main_menu())
                .await?;
        }
    }
    Ok(())
}

async fn dispatch_text(
    bot: &Bot,
    msg: &Message,
    user_id: i64,
    text: &str,
    ctx: &Arc<BotContext>,
) -> AppResult<()> {
    if MenuAction::parse(text) == Some(MenuAction::Cancel) {
        ctx.sessions.set(user_id, SessionState::Main);
        bot.send_message(msg.chat.id, "Cancelled.")
            .reply_markup(keyboards::main_menu())
            .await?;
        return Ok(());
    }

    match ctx.sessions.get(user_id) {
        SessionState::AwaitingTelegramHandle => {
            receive_telegram_handle(bot, msg, user_id, text, ctx).await
        }
        SessionState::AwaitingTwitterHandle => {
            receive_twitter_handle(bot, msg, user_id, text, ctx).await
        }
        SessionState::AwaitingGroupCheck => receive_group_claim(bot, msg, user_id, text, ctx).await,
        SessionState::AwaitingWallet => receive_wallet(bot, msg, user_id, text, ctx).await,
        SessionState::AwaitingWithdrawalAmount => {
            receive_withdrawal_amount(bot, msg, user_id, text, ctx).await
        }
        SessionState::AwaitingBroadcast => {
            admin::receive_broadcast(bot, msg, user_id, text, ctx).await
        }
        SessionState::Main => main_menu_action(bot, msg, user_id, text, ctx).await,
    }
}

// ========== ONBOARDING ==========

async fn start(
    bot: &Bot,
    msg: &Message,
    from: &teloxide::types::User,
    payload: &str,
    ctx: &Arc<BotContext>,
) -> AppResult<()> {
    let user_id = from.id.0 as i64;
    let settings = ctx.repo.get_settings().await?;

    let existing = ctx.repo.get_user(user_id).await?;
    let user = match existing {
        Some(user) => user,
        None => {
            let inviter = validation::parse_referral_payload(payload, user_id);
            let user = ctx
                .repo
                .create_user(
                    user_id,
                    from.username.clone(),
                    Some(from.full_name()),
                    inviter,
                    settings.signup_bonus,
                )
                .await?;

            if let Some(inviter_id) = inviter {
                if ctx
                    .repo
                    .credit_referral(inviter_id, user_id, settings.referral_bonus)
                    .await?
                {
                    let note = format!(
                        "🎉 Someone joined with your link! +{} MetaCore",
                        settings.referral_bonus.normalize()
                    );
                    // inviter may have blocked the bot; their bonus stands either way
                    let _ = bot.send_message(ChatId(inviter_id), note).await;
                }
            }
            user
        }
    };

    if user.is_registered() {
        ctx.sessions.set(user_id, SessionState::Main);
        bot.send_message(msg.chat.id, "👋 Welcome back! Pick an option below.")
            .reply_markup(keyboards::main_menu())
            .await?;
        return Ok(());
    }

    ctx.sessions
        .set(user_id, SessionState::AwaitingTelegramHandle);
    bot.send_message(
        msg.chat.id,
        format!(
            "🚀 Welcome to the MetaCore airdrop!\n\n\
             You start with {} MetaCore.\n\n\
             First, what is your Telegram handle? (e.g. @my_handle)",
            settings.signup_bonus.normalize()
        ),
    )
    .await?;
    Ok(())
}

async fn receive_telegram_handle(
    bot: &Bot,
    msg: &Message,
    user_id: i64,
    text: &str,
    ctx: &Arc<BotContext>,
) -> AppResult<()> {
    if !validation::is_valid_telegram_handle(text) {
        bot.send_message(
            msg.chat.id,
            "That doesn't look like a Telegram handle (5-32 letters, digits or _). Try again:",
        )
        .await?;
        return Ok(());
    }

    ctx.repo
        .set_telegram_handle(user_id, &validation::normalize_handle(text))
        .await?;
    ctx.sessions
        .set(user_id, SessionState::AwaitingTwitterHandle);
    bot.send_message(
        msg.chat.id,
        "Got it. Now your X (Twitter) handle? (e.g. @my_handle)",
    )
    .await?;
    Ok(())
}

async fn receive_twitter_handle(
    bot: &Bot,
    msg: &Message,
    user_id: i64,
    text: &str,
    ctx: &Arc<BotContext>,
) -> AppResult<()> {
    if !validation::is_valid_twitter_handle(text) {
        bot.send_message(
            msg.chat.id,
            "That doesn't look like an X handle (1-15 letters, digits or _). Try again:",
        )
        .await?;
        return Ok(());
    }

    ctx.repo
        .set_twitter_handle(user_id, &validation::normalize_handle(text))
        .await?;
    ctx.sessions.set(user_id, SessionState::AwaitingGroupCheck);

    let mut lines = vec!["Almost there! Join our groups, then press the button:".to_string()];
    for group in &ctx.config.required_groups {
        lines.push(format!("• {} — {}", group.name, group.invite_link));
    }
    bot.send_message(msg.chat.id, lines.join("\n"))
        .reply_markup(keyboards::groups_menu())
        .await?;
    Ok(())
}

async fn receive_group_claim(
    bot: &Bot,
    msg: &Message,
    user_id: i64,
    text: &str,
    ctx: &Arc<BotContext>,
) -> AppResult<()> {
    if MenuAction::parse(text) != Some(MenuAction::ConfirmGroups) {
        bot.send_message(msg.chat.id, "Press the button once you joined every group.")
            .reply_markup(keyboards::groups_menu())
            .await?;
        return Ok(());
    }

    let checks = membership::verify_membership(bot, &ctx.config.required_groups, user_id).await;
    ctx.repo
        .update_group_status(
            user_id,
            &membership::status_snapshot(&checks),
            membership::all_joined(&checks),
        )
        .await?;

    if !membership::all_joined(&checks) {
        let mut lines = vec!["You're not in all groups yet. Still missing:".to_string()];
        for check in membership::missing_groups(&checks) {
            lines.push(format!("• {} — {}", check.name, check.invite_link));
        }
        bot.send_message(msg.chat.id, lines.join("\n"))
            .reply_markup(keyboards::groups_menu())
            .await?;
        return Ok(());
    }

    let settings = ctx.repo.get_settings().await?;
    let credited = ctx
        .repo
        .claim_group_bonus(user_id, settings.group_join_bonus)
        .await?;

    ctx.sessions.set(user_id, SessionState::Main);
    let reply = if credited {
        format!(
            "✅ All groups joined! +{} MetaCore.\n\nYou're all set — pick an option below.",
            settings.group_join_bonus.normalize()
        )
    } else {
        "✅ All groups joined. Pick an option below.".to_string()
    };
    bot.send_message(msg.chat.id, reply)
        .reply_markup(keyboards::main_menu())
        .await?;
    Ok(())
}

// ========== MAIN MENU ==========

async fn main_menu_action(
    bot: &Bot,
    msg: &Message,
    user_id: i64,
    text: &str,
    ctx: &Arc<BotContext>,
) -> AppResult<()> {
    let Some(action) = MenuAction::parse(text) else {
        bot.send_message(msg.chat.id, "Use the menu below, or /start to begin.")
            .reply_markup(keyboards::main_menu())
            .await?;
        return Ok(());
    };

    match action {
        MenuAction::Balance => show_balance(bot, msg, user_id, ctx).await,
        MenuAction::Profile => show_profile(bot, msg, user_id, ctx).await,
        MenuAction::Referral => show_referral(bot, msg, user_id, ctx).await,
        MenuAction::SetWallet => prompt_wallet(bot, msg, user_id, ctx).await,
        MenuAction::Withdraw => prompt_withdrawal(bot, msg, user_id, ctx).await,
        MenuAction::Help => help(bot, msg).await,
        MenuAction::ConfirmGroups => receive_group_claim(bot, msg, user_id, text, ctx).await,
        MenuAction::Cancel => Ok(()), // handled before dispatch
    }
}

async fn show_balance(
    bot: &Bot,
    msg: &Message,
    user_id: i64,
    ctx: &Arc<BotContext>,
) -> AppResult<()> {
    let user = ctx.repo.require_user(user_id).await?;
    let settings = ctx.repo.get_settings().await?;
    let usd = usd_value(user.balance, settings.token_price_usd);

    bot.send_message(
        msg.chat.id,
        format!(
            "💰 Balance: {} MetaCore (≈ ${})\n\
             Minimum withdrawal: {} MetaCore",
            user.balance.normalize(),
            usd,
            settings.min_withdrawal.normalize()
        ),
    )
    .reply_markup(keyboards::main_menu())
    .await?;
    Ok(())
}

async fn show_profile(
    bot: &Bot,
    msg: &Message,
    user_id: i64,
    ctx: &Arc<BotContext>,
) -> AppResult<()> {
    let user = ctx.repo.require_user(user_id).await?;
    let referrals = ctx.repo.referral_count(user_id).await?;
    let none = "not set".to_string();

    bot.send_message(
        msg.chat.id,
        format!(
            "👤 Your profile\n\
             Telegram: @{}\n\
             X: @{}\n\
             Wallet: {}\n\
             Groups joined: {}\n\
             Referrals: {}",
            user.telegram_handle.as_ref().unwrap_or(&none),
            user.twitter_handle.as_ref().unwrap_or(&none),
            user.wallet_address.as_ref().unwrap_or(&none),
            if user.joined_all_groups { "yes" } else { "no" },
            referrals
        ),
    )
    .reply_markup(keyboards::main_menu())
    .await?;
    Ok(())
}

async fn show_referral(
    bot: &Bot,
    msg: &Message,
    user_id: i64,
    ctx: &Arc<BotContext>,
) -> AppResult<()> {
    let settings = ctx.repo.get_settings().await?;
    let referrals = ctx.repo.referral_count(user_id).await?;
    let link = format!("https://t.me/{}?start=ref{}", ctx.bot_username, user_id);

    bot.send_message(
        msg.chat.id,
        format!(
            "🔗 Your referral link:\n{}\n\n\
             Each friend who joins earns you {} MetaCore.\n\
             Referrals so far: {}",
            link,
            settings.referral_bonus.normalize(),
            referrals
        ),
    )
    .reply_markup(keyboards::main_menu())
    .await?;
    Ok(())
}

// ========== WALLET ==========

async fn prompt_wallet(
    bot: &Bot,
    msg: &Message,
    user_id: i64,
    ctx: &Arc<BotContext>,
) -> AppResult<()> {
    ctx.sessions.set(user_id, SessionState::AwaitingWallet);
    bot.send_message(
        msg.chat.id,
        "💳 Send your BEP-20 (BSC) wallet address, starting with 0x:",
    )
    .reply_markup(keyboards::cancel_menu())
    .await?;
    Ok(())
}

async fn receive_wallet(
    bot: &Bot,
    msg: &Message,
    user_id: i64,
    text: &str,
    ctx: &Arc<BotContext>,
) -> AppResult<()> {
    let address = text.trim();
    if !validation::is_valid_wallet_address(address) {
        bot.send_message(
            msg.chat.id,
            "That's not a valid address. It must be 0x followed by 40 hex characters. Try again:",
        )
        .await?;
        return Ok(());
    }

    ctx.repo.set_wallet_address(user_id, address).await?;
    ctx.sessions.set(user_id, SessionState::Main);
    bot.send_message(msg.chat.id, "✅ Wallet saved.")
        .reply_markup(keyboards::main_menu())
        .await?;
    Ok(())
}

// ========== WITHDRAWAL ==========

async fn prompt_withdrawal(
    bot: &Bot,
    msg: &Message,
    user_id: i64,
    ctx: &Arc<BotContext>,
) -> AppResult<()> {
    let user = ctx.repo.require_user(user_id).await?;
    let settings = ctx.repo.get_settings().await?;

    if !user.joined_all_groups {
        ctx.sessions.set(user_id, SessionState::AwaitingGroupCheck);
        bot.send_message(
            msg.chat.id,
            "Join all required groups before withdrawing, then press the button.",
        )
        .reply_markup(keyboards::groups_menu())
        .await?;
        return Ok(());
    }
    if user.wallet_address.is_none() {
        bot.send_message(msg.chat.id, "Set your wallet address first (💳 Set Wallet).")
            .reply_markup(keyboards::main_menu())
            .await?;
        return Ok(());
    }
    if user.balance < settings.min_withdrawal {
        bot.send_message(
            msg.chat.id,
            format!(
                "You need at least {} MetaCore to withdraw. Your balance: {}.",
                settings.min_withdrawal.normalize(),
                user.balance.normalize()
            ),
        )
        .reply_markup(keyboards::main_menu())
        .await?;
        return Ok(());
    }

    ctx.sessions
        .set(user_id, SessionState::AwaitingWithdrawalAmount);
    bot.send_message(
        msg.chat.id,
        format!(
            "💸 How much do you want to withdraw?\n\
             Balance: {} MetaCore, minimum: {}.\n\
             Send a number or \"all\".",
            user.balance.normalize(),
            settings.min_withdrawal.normalize()
        ),
    )
    .reply_markup(keyboards::cancel_menu())
    .await?;
    Ok(())
}

async fn receive_withdrawal_amount(
    bot: &Bot,
    msg: &Message,
    user_id: i64,
    text: &str,
    ctx: &Arc<BotContext>,
) -> AppResult<()> {
    let user = ctx.repo.require_user(user_id).await?;
    let settings = ctx.repo.get_settings().await?;

    let Some(amount) = validation::parse_withdrawal_amount(text, user.balance) else {
        bot.send_message(msg.chat.id, "Send a number (e.g. 4500) or \"all\":")
            .await?;
        return Ok(());
    };
    if let Err(e) = validation::validate_withdrawal_amount(amount, settings.min_withdrawal, user.balance)
    {
        let hint = match e {
            validation::AmountError::BelowMinimum { min } => {
                format!("Minimum withdrawal is {} MetaCore.", min.normalize())
            }
            validation::AmountError::ExceedsBalance { balance } => {
                format!("Your balance is only {} MetaCore.", balance.normalize())
            }
            validation::AmountError::NotPositive => "The amount must be positive.".to_string(),
        };
        bot.send_message(msg.chat.id, format!("{hint} Try again:"))
            .await?;
        return Ok(());
    }

    let Some(wallet) = user.wallet_address else {
        ctx.sessions.set(user_id, SessionState::Main);
        bot.send_message(msg.chat.id, "Set your wallet address first (💳 Set Wallet).")
            .reply_markup(keyboards::main_menu())
            .await?;
        return Ok(());
    };

    let withdrawal = ctx
        .repo
        .create_withdrawal(user_id, amount, &wallet, ctx.config.network().label())
        .await?;

    ctx.sessions.set(user_id, SessionState::Main);
    bot.send_message(
        msg.chat.id,
        format!(
            "✅ Withdrawal request #{} for {} MetaCore created.\n\
             It will be reviewed and paid out to {}.",
            withdrawal.id,
            amount.normalize(),
            wallet
        ),
    )
    .reply_markup(keyboards::main_menu())
    .await?;

    // review notification; losing it is harmless, the request stays listed
    let _ = bot
        .send_message(
            ChatId(ctx.config.admin_id),
            format!(
                "💸 Withdrawal #{}\nUser: {}\nAmount: {} MetaCore\nTo: {}",
                withdrawal.id,
                user_id,
                amount.normalize(),
                wallet
            ),
        )
        .reply_markup(keyboards::withdrawal_review(withdrawal.id))
        .await;
    Ok(())
}

// ========== HELP ==========

async fn help(bot: &Bot, msg: &Message) -> AppResult<()> {
    bot.send_message(
        msg.chat.id,
        "❓ How it works\n\n\
         • You earn MetaCore for signing up, joining our groups and \
         inviting friends with your referral link.\n\
         • Set a BEP-20 wallet address to receive payouts.\n\
         • Request a withdrawal any time; once approved it is paid \
         on-chain to your wallet.\n\n\
         Use /start to restart onboarding.",
    )
    .reply_markup(keyboards::main_menu())
    .await?;
    Ok(())
}

/// Balance display helper shared with the admin lookup.
pub fn usd_value(balance: Decimal, price: Decimal) -> Decimal {
    (balance * price).round_dp(2)
}
