use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;

use super::models::*;
use crate::error::{AppResult, LedgerError};

/// Ledger repository - THE source of truth for all balances and withdrawals.
///
/// Every balance movement goes through here, paired with an append-only
/// `transactions` row written in the same database transaction.
pub struct LedgerRepository {
    pub pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn begin_tx(&self) -> AppResult<Transaction<'_, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    pub async fn health_check(&self) -> AppResult<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    // ========== USER OPERATIONS ==========

    /// Register a Telegram account if unseen and credit the signup bonus.
    /// Re-running for an existing user is a no-op and returns the stored row.
    pub async fn create_user(
        &self,
        user_id: i64,
        username: Option<String>,
        full_name: Option<String>,
        invited_by: Option<i64>,
        signup_bonus: Decimal,
    ) -> AppResult<User> {
        let mut tx = self.begin_tx().await?;

        let inserted = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, full_name, balance, invited_by)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(&username)
        .bind(&full_name)
        .bind(signup_bonus)
        .bind(invited_by)
        .fetch_optional(&mut *tx)
        .await?;

        let user = match inserted {
            Some(user) => {
                sqlx::query(
                    r#"
                    INSERT INTO transactions (user_id, kind, amount, description)
                    VALUES ($1, $2, $3, 'Welcome bonus')
                    "#,
                )
                .bind(user_id)
                .bind(tx_kind::SIGNUP)
                .bind(signup_bonus)
                .execute(&mut *tx)
                .await?;

                info!("👤 New user {} registered, signup bonus {}", user_id, signup_bonus);
                user
            }
            None => self
                .fetch_user(&mut tx, user_id)
                .await?
                .ok_or(LedgerError::UserNotFound(user_id))?,
        };

        tx.commit().await?;
        Ok(user)
    }

    pub async fn get_user(&self, user_id: i64) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn require_user(&self, user_id: i64) -> AppResult<User> {
        self.get_user(user_id)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(user_id).into())
    }

    async fn fetch_user(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
    ) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(user)
    }

    pub async fn set_telegram_handle(&self, user_id: i64, handle: &str) -> AppResult<()> {
        self.set_user_field(user_id, "telegram_handle", handle).await
    }

    pub async fn set_twitter_handle(&self, user_id: i64, handle: &str) -> AppResult<()> {
        self.set_user_field(user_id, "twitter_handle", handle).await
    }

    pub async fn set_wallet_address(&self, user_id: i64, address: &str) -> AppResult<()> {
        self.set_user_field(user_id, "wallet_address", address).await
    }

    async fn set_user_field(&self, user_id: i64, column: &str, value: &str) -> AppResult<()> {
        // column names come from the three callers above, never from input
        let sql = format!("UPDATE users SET {column} = $2, updated_at = NOW() WHERE id = $1");
        let result = sqlx::query(&sql)
            .bind(user_id)
            .bind(value)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::UserNotFound(user_id).into());
        }
        Ok(())
    }

    /// Persist the latest per-group membership snapshot.
    pub async fn update_group_status(
        &self,
        user_id: i64,
        group_status: &serde_json::Value,
        joined_all: bool,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET group_status = $2, joined_all_groups = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(group_status)
        .bind(joined_all)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::UserNotFound(user_id).into());
        }
        Ok(())
    }

    pub async fn all_user_ids(&self) -> AppResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>("SELECT id FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    // ========== BALANCE OPERATIONS ==========

    /// Credit a user's balance and record the movement, atomically.
    pub async fn credit_balance(
        &self,
        user_id: i64,
        amount: Decimal,
        kind: &str,
        description: &str,
        reference_id: Option<i64>,
    ) -> AppResult<Decimal> {
        let mut tx = self.begin_tx().await?;
        let new_balance = self
            .credit_in_tx(&mut tx, user_id, amount, kind, description, reference_id)
            .await?;
        tx.commit().await?;
        Ok(new_balance)
    }

    async fn credit_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        amount: Decimal,
        kind: &str,
        description: &str,
        reference_id: Option<i64>,
    ) -> AppResult<Decimal> {
        let new_balance = sqlx::query_scalar::<_, Decimal>(
            r#"
            UPDATE users
            SET balance = balance + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING balance
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(LedgerError::UserNotFound(user_id))?;

        sqlx::query(
            r#"
            INSERT INTO transactions (user_id, kind, amount, description, reference_id)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user_id)
        .bind(kind)
        .bind(amount)
        .bind(description)
        .bind(reference_id)
        .execute(&mut **tx)
        .await?;

        Ok(new_balance)
    }

    /// Credit the one-time group bonus. Returns false if it was already
    /// claimed; the guard and the credit run in one transaction.
    pub async fn claim_group_bonus(&self, user_id: i64, bonus: Decimal) -> AppResult<bool> {
        let mut tx = self.begin_tx().await?;

        let claimed = sqlx::query(
            r#"
            UPDATE users
            SET group_bonus_received = TRUE, updated_at = NOW()
            WHERE id = $1 AND NOT group_bonus_received
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if claimed {
            self.credit_in_tx(
                &mut tx,
                user_id,
                bonus,
                tx_kind::GROUP_JOIN,
                "Joined all required groups",
                None,
            )
            .await?;
            info!("🎁 Group bonus {} credited to user {}", bonus, user_id);
        }

        tx.commit().await?;
        Ok(claimed)
    }

    // ========== REFERRAL OPERATIONS ==========

    /// Record a referral edge and pay the inviter. The unique (inviter,
    /// invited) key makes the bonus idempotent: the same invitee can never
    /// be counted twice, whatever order the /start retries arrive in.
    pub async fn credit_referral(
        &self,
        inviter_id: i64,
        invited_id: i64,
        bonus: Decimal,
    ) -> AppResult<bool> {
        let mut tx = self.begin_tx().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO referrals (inviter_id, invited_id, bonus_credited)
            VALUES ($1, $2, TRUE)
            ON CONFLICT (inviter_id, invited_id) DO NOTHING
            "#,
        )
        .bind(inviter_id)
        .bind(invited_id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if inserted {
            self.credit_in_tx(
                &mut tx,
                inviter_id,
                bonus,
                tx_kind::REFERRAL,
                &format!("Referral bonus for inviting {invited_id}"),
                Some(invited_id),
            )
            .await?;
            info!("🤝 Referral bonus {} credited to {} for {}", bonus, inviter_id, invited_id);
        }

        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn referral_count(&self, inviter_id: i64) -> AppResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM referrals WHERE inviter_id = $1",
        )
        .bind(inviter_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    // ========== WITHDRAWAL OPERATIONS ==========

    /// Create a withdrawal request, debiting the balance up front.
    ///
    /// The debit is conditional on `balance >= amount`, so a concurrent
    /// request can never push the balance negative; losers of the race get
    /// `InsufficientBalance`.
    pub async fn create_withdrawal(
        &self,
        user_id: i64,
        amount: Decimal,
        to_address: &str,
        network: &str,
    ) -> AppResult<Withdrawal> {
        let mut tx = self.begin_tx().await?;

        let debited = sqlx::query(
            r#"
            UPDATE users
            SET balance = balance - $2, updated_at = NOW()
            WHERE id = $1 AND balance >= $2
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        if debited.rows_affected() == 0 {
            let available = self
                .fetch_user(&mut tx, user_id)
                .await?
                .map(|u| u.balance.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(LedgerError::InsufficientBalance {
                required: amount.to_string(),
                available,
            }
            .into());
        }

        let withdrawal = sqlx::query_as::<_, Withdrawal>(
            r#"
            INSERT INTO withdrawals (user_id, amount, to_address, network)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .bind(to_address)
        .bind(network)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO transactions (user_id, kind, amount, description, reference_id)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user_id)
        .bind(tx_kind::WITHDRAWAL)
        .bind(-amount)
        .bind(format!("Withdrawal request to {to_address}"))
        .bind(withdrawal.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!("💸 Withdrawal #{} created: user {} amount {}", withdrawal.id, user_id, amount);
        Ok(withdrawal)
    }

    pub async fn get_withdrawal(&self, withdrawal_id: i64) -> AppResult<Withdrawal> {
        let withdrawal =
            sqlx::query_as::<_, Withdrawal>("SELECT * FROM withdrawals WHERE id = $1")
                .bind(withdrawal_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(LedgerError::WithdrawalNotFound(withdrawal_id))?;
        Ok(withdrawal)
    }

    pub async fn list_pending_withdrawals(&self, limit: i64) -> AppResult<Vec<Withdrawal>> {
        let rows = sqlx::query_as::<_, Withdrawal>(
            r#"
            SELECT * FROM withdrawals
            WHERE status = 'pending'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Oldest approved withdrawals first, so the settlement queue is FIFO.
    pub async fn list_approved_withdrawals(&self, limit: i64) -> AppResult<Vec<Withdrawal>> {
        let rows = sqlx::query_as::<_, Withdrawal>(
            r#"
            SELECT * FROM withdrawals
            WHERE status = 'approved'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_user_withdrawals(
        &self,
        user_id: i64,
        limit: i64,
    ) -> AppResult<Vec<Withdrawal>> {
        let rows = sqlx::query_as::<_, Withdrawal>(
            r#"
            SELECT * FROM withdrawals
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// pending → approved. The funds stay debited; the settlement worker
    /// picks the row up on its next pass.
    pub async fn approve_withdrawal(&self, withdrawal_id: i64) -> AppResult<Withdrawal> {
        WithdrawalStatus::validate_transition(
            WithdrawalStatus::Pending,
            WithdrawalStatus::Approved,
        )?;

        let withdrawal = sqlx::query_as::<_, Withdrawal>(
            r#"
            UPDATE withdrawals
            SET status = 'approved'
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(withdrawal_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::StatusConflict(withdrawal_id))?;

        info!("✓ Withdrawal #{} approved", withdrawal_id);
        Ok(withdrawal)
    }

    /// pending → rejected, refunding the debit in the same transaction.
    pub async fn reject_withdrawal(
        &self,
        withdrawal_id: i64,
        note: Option<&str>,
    ) -> AppResult<Withdrawal> {
        WithdrawalStatus::validate_transition(
            WithdrawalStatus::Pending,
            WithdrawalStatus::Rejected,
        )?;

        let mut tx = self.begin_tx().await?;

        let withdrawal = sqlx::query_as::<_, Withdrawal>(
            r#"
            UPDATE withdrawals
            SET status = 'rejected', admin_note = $2, processed_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(withdrawal_id)
        .bind(note)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LedgerError::StatusConflict(withdrawal_id))?;

        self.credit_in_tx(
            &mut tx,
            withdrawal.user_id,
            withdrawal.amount,
            tx_kind::REFUND,
            "Withdrawal rejected, amount returned",
            Some(withdrawal.id),
        )
        .await?;

        tx.commit().await?;
        info!("✗ Withdrawal #{} rejected, {} refunded", withdrawal_id, withdrawal.amount);
        Ok(withdrawal)
    }

    /// approved → processing. The conditional update is the claim: with
    /// several workers racing, exactly one sees rows_affected == 1.
    pub async fn claim_for_processing(&self, withdrawal_id: i64) -> AppResult<bool> {
        WithdrawalStatus::validate_transition(
            WithdrawalStatus::Approved,
            WithdrawalStatus::Processing,
        )?;

        let result = sqlx::query(
            r#"
            UPDATE withdrawals
            SET status = 'processing', processed_at = NOW()
            WHERE id = $1 AND status = 'approved'
            "#,
        )
        .bind(withdrawal_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// processing → paid. No refund: the user already gave up the balance
    /// when the request was created and the tokens are now on-chain.
    pub async fn mark_paid(&self, withdrawal_id: i64, tx_hash: &str) -> AppResult<()> {
        WithdrawalStatus::validate_transition(
            WithdrawalStatus::Processing,
            WithdrawalStatus::Paid,
        )?;

        let result = sqlx::query(
            r#"
            UPDATE withdrawals
            SET status = 'paid', tx_hash = $2, processed_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(withdrawal_id)
        .bind(tx_hash)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::StatusConflict(withdrawal_id).into());
        }

        info!("💰 Withdrawal #{} paid, tx {}", withdrawal_id, tx_hash);
        Ok(())
    }

    /// processing → failed with the refund in the same transaction.
    ///
    /// The conditional terminal update is what makes the refund
    /// exactly-once: once a row has left `processing`, a second failure
    /// report matches nothing and no second credit is written.
    pub async fn fail_with_refund(
        &self,
        withdrawal_id: i64,
        note: &str,
        tx_hash: Option<&str>,
    ) -> AppResult<bool> {
        WithdrawalStatus::validate_transition(
            WithdrawalStatus::Processing,
            WithdrawalStatus::Failed,
        )?;

        let mut tx = self.begin_tx().await?;

        let failed = sqlx::query_as::<_, Withdrawal>(
            r#"
            UPDATE withdrawals
            SET status = 'failed', admin_note = $2, tx_hash = COALESCE($3, tx_hash),
                processed_at = NOW()
            WHERE id = $1 AND status = 'processing'
            RETURNING *
            "#,
        )
        .bind(withdrawal_id)
        .bind(note)
        .bind(tx_hash)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(withdrawal) = failed else {
            // already settled by another path, nothing to refund
            tx.rollback().await?;
            return Ok(false);
        };

        self.credit_in_tx(
            &mut tx,
            withdrawal.user_id,
            withdrawal.amount,
            tx_kind::REFUND,
            note,
            Some(withdrawal.id),
        )
        .await?;

        tx.commit().await?;
        info!("↩️ Withdrawal #{} failed, {} refunded: {}", withdrawal_id, withdrawal.amount, note);
        Ok(true)
    }

    /// Record the submitted tx hash while the row is still in flight, so a
    /// later crash leaves enough evidence to reconcile against the chain.
    pub async fn record_tx_hash(&self, withdrawal_id: i64, tx_hash: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE withdrawals
            SET tx_hash = $2
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(withdrawal_id)
        .bind(tx_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Withdrawals stuck in `processing` since before `cutoff`. The janitor
    /// decides per row how to resolve them.
    pub async fn list_stale_processing(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> AppResult<Vec<Withdrawal>> {
        let rows = sqlx::query_as::<_, Withdrawal>(
            r#"
            SELECT * FROM withdrawals
            WHERE status = 'processing' AND processed_at < $1
            ORDER BY processed_at ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Latest balance movements for a user, newest first.
    pub async fn list_user_transactions(
        &self,
        user_id: i64,
        limit: i64,
    ) -> AppResult<Vec<TransactionEntry>> {
        let rows = sqlx::query_as::<_, TransactionEntry>(
            r#"
            SELECT * FROM transactions
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ========== SETTINGS ==========

    pub async fn get_settings(&self) -> AppResult<Settings> {
        let settings = sqlx::query_as::<_, Settings>("SELECT * FROM settings WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(settings)
    }

    /// Update one settings column by key. Keys are whitelisted so the SQL
    /// stays static per key.
    pub async fn update_setting(&self, key: &str, value: Decimal) -> AppResult<Settings> {
        let sql = match key {
            "signup_bonus" => {
                "UPDATE settings SET signup_bonus = $1, updated_at = NOW() WHERE id = 1 RETURNING *"
            }
            "referral_bonus" => {
                "UPDATE settings SET referral_bonus = $1, updated_at = NOW() WHERE id = 1 RETURNING *"
            }
            "group_join_bonus" => {
                "UPDATE settings SET group_join_bonus = $1, updated_at = NOW() WHERE id = 1 RETURNING *"
            }
            "min_withdrawal" => {
                "UPDATE settings SET min_withdrawal = $1, updated_at = NOW() WHERE id = 1 RETURNING *"
            }
            "token_price_usd" => {
                "UPDATE settings SET token_price_usd = $1, updated_at = NOW() WHERE id = 1 RETURNING *"
            }
            other => return Err(LedgerError::UnknownSetting(other.to_string()).into()),
        };

        let settings = sqlx::query_as::<_, Settings>(sql)
            .bind(value)
            .fetch_one(&self.pool)
            .await?;
        Ok(settings)
    }

    // ========== ADMIN / AUDIT ==========

    pub async fn admin_stats(&self) -> AppResult<AdminStats> {
        let stats = sqlx::query_as::<_, AdminStats>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM users) AS total_users,
                (SELECT COUNT(*) FROM users
                 WHERE telegram_handle IS NOT NULL
                   AND twitter_handle IS NOT NULL
                   AND wallet_address IS NOT NULL) AS registered_users,
                (SELECT COALESCE(SUM(balance), 0) FROM users) AS total_balance,
                (SELECT COUNT(*) FROM referrals) AS total_referrals,
                (SELECT COUNT(*) FROM withdrawals WHERE status = 'pending') AS pending_withdrawals,
                (SELECT COUNT(*) FROM withdrawals WHERE status = 'paid') AS paid_withdrawals,
                (SELECT COALESCE(SUM(amount), 0) FROM withdrawals WHERE status = 'paid') AS paid_amount
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }

    pub async fn log_admin_action(
        &self,
        admin_id: i64,
        action: &str,
        details: serde_json::Value,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO admin_logs (admin_id, action, details)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(admin_id)
        .bind(action)
        .bind(details)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
