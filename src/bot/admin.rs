//! Admin surface: statistics, broadcast, manual credits and withdrawal
//! review. Everything here is gated on the configured admin id.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde_json::json;
use teloxide::prelude::*;
use tracing::{info, warn};

use super::handlers::{usd_value, Command};
use super::keyboards::{self, ReviewAction};
use super::session::SessionState;
use super::BotContext;
use crate::error::{AppError, AppResult, LedgerError};
use crate::ledger::{tx_kind, TransactionEntry};
use crate::validation;

pub async fn handle_admin_command(
    bot: &Bot,
    msg: &Message,
    cmd: Command,
    ctx: &Arc<BotContext>,
) -> AppResult<()> {
    match cmd {
        Command::Stats => stats(bot, msg, ctx).await,
        Command::Broadcast(text) => {
            if text.trim().is_empty() {
                ctx.sessions
                    .set(ctx.config.admin_id, SessionState::AwaitingBroadcast);
                bot.send_message(msg.chat.id, "Send the broadcast message:")
                    .await?;
                Ok(())
            } else {
                broadcast(bot, msg, &text, ctx).await
            }
        }
        Command::Userinfo(arg) => user_info(bot, msg, &arg, ctx).await,
        Command::Addbalance(args) => add_balance(bot, msg, &args, ctx).await,
        Command::Withdrawals => list_pending(bot, msg, ctx).await,
        Command::Settings => show_settings(bot, msg, ctx).await,
        Command::Setsetting(args) => set_setting(bot, msg, &args, ctx).await,
        Command::Ping => ping(bot, msg, ctx).await,
        Command::Start(_) | Command::Help => Ok(()), // routed elsewhere
    }
}

async fn stats(bot: &Bot, msg: &Message, ctx: &Arc<BotContext>) -> AppResult<()> {
    let stats = ctx.repo.admin_stats().await?;
    let settings = ctx.repo.get_settings().await?;
    bot.send_message(
        msg.chat.id,
        format!(
            "📊 Campaign stats\n\
             Users: {} ({} fully registered)\n\
             Total balance: {} MetaCore (≈ ${})\n\
             Referrals: {}\n\
             Withdrawals: {} pending, {} paid ({} MetaCore)",
            stats.total_users,
            stats.registered_users,
            stats.total_balance.normalize(),
            usd_value(stats.total_balance, settings.token_price_usd),
            stats.total_referrals,
            stats.pending_withdrawals,
            stats.paid_withdrawals,
            stats.paid_amount.normalize()
        ),
    )
    .await?;
    Ok(())
}

pub async fn receive_broadcast(
    bot: &Bot,
    msg: &Message,
    user_id: i64,
    text: &str,
    ctx: &Arc<BotContext>,
) -> AppResult<()> {
    ctx.sessions.set(user_id, SessionState::Main);
    if !ctx.config.is_admin(user_id) {
        return Ok(());
    }
    broadcast(bot, msg, text, ctx).await
}

async fn broadcast(bot: &Bot, msg: &Message, text: &str, ctx: &Arc<BotContext>) -> AppResult<()> {
    let ids = ctx.repo.all_user_ids().await?;
    let total = ids.len();
    let mut sent = 0usize;

    for user_id in ids {
        match bot.send_message(ChatId(user_id), text).await {
            Ok(_) => sent += 1,
            // blocked the bot or deleted the account, keep going
            Err(e) => warn!("Broadcast to {} failed: {}", user_id, e),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    ctx.repo
        .log_admin_action(
            ctx.config.admin_id,
            "broadcast",
            json!({ "recipients": total, "delivered": sent }),
        )
        .await?;
    info!("📣 Broadcast delivered to {}/{} users", sent, total);
    bot.send_message(msg.chat.id, format!("📣 Delivered to {sent}/{total} users."))
        .await?;
    Ok(())
}

async fn user_info(bot: &Bot, msg: &Message, arg: &str, ctx: &Arc<BotContext>) -> AppResult<()> {
    let Ok(user_id) = arg.trim().parse::<i64>() else {
        bot.send_message(msg.chat.id, "Usage: /userinfo <user_id>")
            .await?;
        return Ok(());
    };

    let Some(user) = ctx.repo.get_user(user_id).await? else {
        bot.send_message(msg.chat.id, format!("No user with id {user_id}."))
            .await?;
        return Ok(());
    };
    let settings = ctx.repo.get_settings().await?;
    let referrals = ctx.repo.referral_count(user_id).await?;
    let withdrawals = ctx.repo.list_user_withdrawals(user_id, 5).await?;
    let movements = ctx.repo.list_user_transactions(user_id, 5).await?;
    let none = "—".to_string();

    let mut lines = vec![format!(
        "👤 User {}\n\
         Name: {}\n\
         Telegram: @{}  X: @{}\n\
         Wallet: {}\n\
         Balance: {} MetaCore (≈ ${})\n\
         Groups: {}  Group status: {}\n\
         Invited by: {}  Referrals: {}",
        user.id,
        user.full_name.as_ref().unwrap_or(&none),
        user.telegram_handle.as_ref().unwrap_or(&none),
        user.twitter_handle.as_ref().unwrap_or(&none),
        user.wallet_address.as_ref().unwrap_or(&none),
        user.balance.normalize(),
        usd_value(user.balance, settings.token_price_usd),
        if user.joined_all_groups { "all" } else { "incomplete" },
        serde_json::to_string(&user.group_status.0).unwrap_or_default(),
        user.invited_by
            .map(|id| id.to_string())
            .unwrap_or_else(|| none.clone()),
        referrals
    )];
    if !withdrawals.is_empty() {
        lines.push("\nRecent withdrawals:".to_string());
        for w in withdrawals {
            lines.push(format!(
                "#{} {} MetaCore — {}",
                w.id,
                w.amount.normalize(),
                w.status
            ));
        }
    }
    if !movements.is_empty() {
        lines.push("\nRecent activity:".to_string());
        for entry in &movements {
            lines.push(format_transaction_line(entry));
        }
    }
    bot.send_message(msg.chat.id, lines.join("\n")).await?;
    Ok(())
}

/// One audit-log line per balance movement; credits carry a leading plus.
fn format_transaction_line(entry: &TransactionEntry) -> String {
    let amount = entry.amount.normalize();
    let signed = if amount > Decimal::ZERO {
        format!("+{amount}")
    } else {
        amount.to_string()
    };
    format!(
        "{} {} MetaCore — {}",
        entry.created_at.format("%Y-%m-%d"),
        signed,
        entry.description
    )
}

async fn add_balance(bot: &Bot, msg: &Message, args: &str, ctx: &Arc<BotContext>) -> AppResult<()> {
    let Some((user_id, amount)) = validation::parse_user_amount(args) else {
        bot.send_message(msg.chat.id, "Usage: /addbalance <user_id> <amount>")
            .await?;
        return Ok(());
    };

    match ctx
        .repo
        .credit_balance(
            user_id,
            amount,
            tx_kind::ADMIN_CREDIT,
            "Manual credit by admin",
            None,
        )
        .await
    {
        Ok(new_balance) => {
            ctx.repo
                .log_admin_action(
                    ctx.config.admin_id,
                    "add_balance",
                    json!({ "user_id": user_id, "amount": amount.to_string() }),
                )
                .await?;
            bot.send_message(
                msg.chat.id,
                format!(
                    "✓ Credited {} MetaCore to {}. New balance: {}.",
                    amount.normalize(),
                    user_id,
                    new_balance.normalize()
                ),
            )
            .await?;
            let _ = bot
                .send_message(
                    ChatId(user_id),
                    format!("🎁 You received {} MetaCore!", amount.normalize()),
                )
                .await;
        }
        Err(AppError::Ledger(LedgerError::UserNotFound(_))) => {
            bot.send_message(msg.chat.id, format!("No user with id {user_id}."))
                .await?;
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

async fn list_pending(bot: &Bot, msg: &Message, ctx: &Arc<BotContext>) -> AppResult<()> {
    let pending = ctx.repo.list_pending_withdrawals(10).await?;
    if pending.is_empty() {
        bot.send_message(msg.chat.id, "No pending withdrawals. 🎉")
            .await?;
        return Ok(());
    }

    for w in pending {
        bot.send_message(
            msg.chat.id,
            format!(
                "💸 Withdrawal #{}\nUser: {}\nAmount: {} MetaCore\nTo: {}\nRequested: {}",
                w.id,
                w.user_id,
                w.amount.normalize(),
                w.to_address,
                w.created_at.format("%Y-%m-%d %H:%M UTC")
            ),
        )
        .reply_markup(keyboards::withdrawal_review(w.id))
        .await?;
    }
    Ok(())
}

async fn show_settings(bot: &Bot, msg: &Message, ctx: &Arc<BotContext>) -> AppResult<()> {
    let s = ctx.repo.get_settings().await?;
    bot.send_message(
        msg.chat.id,
        format!(
            "⚙️ Settings\n\
             signup_bonus: {}\n\
             referral_bonus: {}\n\
             group_join_bonus: {}\n\
             min_withdrawal: {}\n\
             token_price_usd: {}\n\n\
             Change with /setsetting <key> <value>",
            s.signup_bonus.normalize(),
            s.referral_bonus.normalize(),
            s.group_join_bonus.normalize(),
            s.min_withdrawal.normalize(),
            s.token_price_usd.normalize()
        ),
    )
    .await?;
    Ok(())
}

async fn set_setting(bot: &Bot, msg: &Message, args: &str, ctx: &Arc<BotContext>) -> AppResult<()> {
    let Some((key, value)) = parse_setting_args(args) else {
        bot.send_message(msg.chat.id, "Usage: /setsetting <key> <value>")
            .await?;
        return Ok(());
    };

    match ctx.repo.update_setting(&key, value).await {
        Ok(_) => {
            ctx.repo
                .log_admin_action(
                    ctx.config.admin_id,
                    "set_setting",
                    json!({ "key": key, "value": value.to_string() }),
                )
                .await?;
            bot.send_message(msg.chat.id, format!("✓ {key} set to {}.", value.normalize()))
                .await?;
        }
        Err(AppError::Ledger(LedgerError::UnknownSetting(key))) => {
            bot.send_message(
                msg.chat.id,
                format!("Unknown key {key:?}. See /settings for the valid keys."),
            )
            .await?;
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

async fn ping(bot: &Bot, msg: &Message, ctx: &Arc<BotContext>) -> AppResult<()> {
    let db = match ctx.repo.health_check().await {
        Ok(()) => "ok".to_string(),
        Err(e) => format!("FAILED ({e})"),
    };
    bot.send_message(
        msg.chat.id,
        format!(
            "🏓 Pong\nDatabase: {}\nNetwork: {}",
            db,
            ctx.config.network().label()
        ),
    )
    .await?;
    Ok(())
}

// ========== WITHDRAWAL REVIEW ==========

pub async fn handle_callback(bot: Bot, q: CallbackQuery, ctx: Arc<BotContext>) -> ResponseResult<()> {
    let admin_id = q.from.id.0 as i64;
    if !ctx.config.is_admin(admin_id) {
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    }
    let Some(action) = q.data.as_deref().and_then(ReviewAction::parse) else {
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    };

    let verdict = match review(&bot, action, &ctx).await {
        Ok(verdict) => verdict,
        Err(AppError::Ledger(LedgerError::StatusConflict(_))) => {
            "Already handled.".to_string()
        }
        Err(e) => {
            warn!("Withdrawal review failed: {}", e);
            "Review failed, see logs.".to_string()
        }
    };

    bot.answer_callback_query(q.id).text(verdict.clone()).await?;
    if let Some(message) = q.message {
        bot.edit_message_text(message.chat().id, message.id(), verdict)
            .await?;
    }
    Ok(())
}

async fn review(bot: &Bot, action: ReviewAction, ctx: &Arc<BotContext>) -> AppResult<String> {
    match action {
        ReviewAction::Approve(id) => {
            let w = ctx.repo.approve_withdrawal(id).await?;
            ctx.repo
                .log_admin_action(ctx.config.admin_id, "approve_withdrawal", json!({ "id": id }))
                .await?;
            let _ = bot
                .send_message(
                    ChatId(w.user_id),
                    format!(
                        "✅ Your withdrawal #{} for {} MetaCore was approved and queued for payout.",
                        w.id,
                        w.amount.normalize()
                    ),
                )
                .await;
            Ok(format!(
                "✅ Withdrawal #{} approved ({} MetaCore to {}).",
                w.id,
                w.amount.normalize(),
                w.to_address
            ))
        }
        ReviewAction::Reject(id) => {
            let w = ctx
                .repo
                .reject_withdrawal(id, Some("Rejected by admin"))
                .await?;
            ctx.repo
                .log_admin_action(ctx.config.admin_id, "reject_withdrawal", json!({ "id": id }))
                .await?;
            let _ = bot
                .send_message(
                    ChatId(w.user_id),
                    format!(
                        "❌ Your withdrawal #{} was rejected. {} MetaCore returned to your balance.",
                        w.id,
                        w.amount.normalize()
                    ),
                )
                .await;
            Ok(format!(
                "❌ Withdrawal #{} rejected, {} MetaCore refunded.",
                w.id,
                w.amount.normalize()
            ))
        }
    }
}

fn parse_setting_args(args: &str) -> Option<(String, Decimal)> {
    let mut parts = args.split_whitespace();
    let key = parts.next()?.to_string();
    let value: Decimal = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn movement(kind: &str, amount: Decimal, description: &str) -> TransactionEntry {
        TransactionEntry {
            id: 1,
            user_id: 7,
            kind: kind.to_string(),
            amount,
            description: description.to_string(),
            reference_id: None,
            created_at: Utc.with_ymd_and_hms(2026, 8, 20, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn transaction_lines_carry_signed_amounts() {
        let credit = movement(tx_kind::SIGNUP, dec!(1000), "Welcome bonus");
        assert_eq!(
            format_transaction_line(&credit),
            "2026-08-20 +1000 MetaCore — Welcome bonus"
        );

        let debit = movement(tx_kind::WITHDRAWAL, dec!(-5000), "Withdrawal request to 0xabc");
        assert_eq!(
            format_transaction_line(&debit),
            "2026-08-20 -5000 MetaCore — Withdrawal request to 0xabc"
        );
    }

    #[test]
    fn setting_args() {
        assert_eq!(
            parse_setting_args("min_withdrawal 4000"),
            Some(("min_withdrawal".to_string(), dec!(4000)))
        );
        assert_eq!(
            parse_setting_args("token_price_usd 0.0225"),
            Some(("token_price_usd".to_string(), dec!(0.0225)))
        );
        assert_eq!(parse_setting_args("min_withdrawal"), None);
        assert_eq!(parse_setting_args("min_withdrawal abc"), None);
        assert_eq!(parse_setting_args("a 1 extra"), None);
    }
}
