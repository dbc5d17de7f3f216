use std::collections::BTreeSet;

use chrono::{NaiveDateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use crate::db::models::*;
use crate::error::{AppError, AppResult};

/// SQLite caps bound parameters per statement; two are bound per row.
const INSERT_CHUNK: usize = 400;

const RECIPIENT_COLUMNS: &str = r#"
    id, notification_id, user_id, is_read, read_at,
    telegram_delivered, telegram_delivered_at, telegram_message_id,
    web_delivered, web_delivered_at
"#;

// ============================================================================
// Notification Recipient Repository
// ============================================================================

/// Repository for per-user recipient rows.
///
/// Every state transition is a conditional `UPDATE ... WHERE <flag> = 0`, so
/// concurrent writers cannot overwrite a timestamp that is already set; the
/// affected row count tells the caller whether it performed the transition.
pub struct RecipientRepository;

impl RecipientRepository {
    /// Insert one row per user, skipping pairs that already exist.
    /// Returns the number of rows actually inserted.
    pub async fn bulk_insert(
        conn: &mut SqliteConnection,
        notification_id: i64,
        user_ids: &BTreeSet<i64>,
    ) -> AppResult<u64> {
        let ids: Vec<i64> = user_ids.iter().copied().collect();
        let mut inserted = 0u64;

        for chunk in ids.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO notification_recipients (notification_id, user_id) ",
            );
            qb.push_values(chunk, |mut row, user_id| {
                row.push_bind(notification_id).push_bind(*user_id);
            });

            let result = qb
                .build()
                .execute(&mut *conn)
                .await
                .map_err(AppError::Database)?;
            inserted += result.rows_affected();
        }

        Ok(inserted)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> AppResult<Option<NotificationRecipient>> {
        sqlx::query_as::<_, NotificationRecipient>(&format!(
            "SELECT {} FROM notification_recipients WHERE id = ?",
            RECIPIENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// All rows of a notification in storage order.
    pub async fn list_for_notification(
        pool: &SqlitePool,
        notification_id: i64,
    ) -> AppResult<Vec<NotificationRecipient>> {
        sqlx::query_as::<_, NotificationRecipient>(&format!(
            "SELECT {} FROM notification_recipients WHERE notification_id = ? ORDER BY id ASC",
            RECIPIENT_COLUMNS
        ))
        .bind(notification_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Rows of a notification that have not been pushed to Telegram yet, in storage order.
    pub async fn pending_telegram(
        pool: &SqlitePool,
        notification_id: i64,
    ) -> AppResult<Vec<NotificationRecipient>> {
        sqlx::query_as::<_, NotificationRecipient>(&format!(
            r#"
            SELECT {} FROM notification_recipients
            WHERE notification_id = ? AND telegram_delivered = 0 AND telegram_rejected_at IS NULL
            ORDER BY id ASC
            "#,
            RECIPIENT_COLUMNS
        ))
        .bind(notification_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Record a Telegram delivery. Returns `true` if this call performed the
    /// transition, `false` if the row was already delivered (or is gone).
    pub async fn mark_telegram_delivered(
        pool: &SqlitePool,
        id: i64,
        message_id: i64,
    ) -> AppResult<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE notification_recipients
            SET telegram_delivered = 1, telegram_delivered_at = ?, telegram_message_id = ?
            WHERE id = ? AND telegram_delivered = 0
            "#,
        )
        .bind(now)
        .bind(message_id)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    /// Stop Telegram dispatch for a row whose chat refuses messages from the bot.
    /// Delivered rows are left untouched.
    pub async fn mark_telegram_rejected(pool: &SqlitePool, id: i64) -> AppResult<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE notification_recipients SET telegram_rejected_at = ?
            WHERE id = ? AND telegram_delivered = 0 AND telegram_rejected_at IS NULL
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    /// Record in-app delivery at `at` for the given rows. Returns how many rows changed.
    pub async fn mark_web_delivered(
        pool: &SqlitePool,
        ids: &[i64],
        at: NaiveDateTime,
    ) -> AppResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE notification_recipients SET web_delivered = 1, web_delivered_at = ");
        qb.push_bind(at).push(" WHERE web_delivered = 0 AND id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let result = qb.build().execute(pool).await.map_err(AppError::Database)?;
        Ok(result.rows_affected())
    }

    /// Mark a row as read. Returns `true` if this call performed the transition.
    pub async fn mark_read(pool: &SqlitePool, id: i64) -> AppResult<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            "UPDATE notification_recipients SET is_read = 1, read_at = ? WHERE id = ? AND is_read = 0",
        )
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    /// Mark every unread row of the user's active notifications as read.
    pub async fn mark_all_read(pool: &SqlitePool, user_id: i64) -> AppResult<u64> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE notification_recipients
            SET is_read = 1, read_at = ?
            WHERE user_id = ?
              AND is_read = 0
              AND notification_id IN (SELECT id FROM notifications WHERE is_active = 1)
            "#,
        )
        .bind(now)
        .bind(user_id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    /// The user's inbox: rows of active notifications, newest first.
    pub async fn list_for_user(
        pool: &SqlitePool,
        user_id: i64,
        unread_only: bool,
        limit: i64,
    ) -> AppResult<Vec<InboxItem>> {
        let rows = sqlx::query_as::<_, InboxRow>(
            r#"
            SELECT
                r.id, r.notification_id, r.user_id, r.is_read, r.read_at,
                r.telegram_delivered, r.telegram_delivered_at, r.telegram_message_id,
                r.web_delivered, r.web_delivered_at,
                n.title AS n_title,
                n.message AS n_message,
                n.notification_type AS n_notification_type,
                n.target_type AS n_target_type,
                n.target_id AS n_target_id,
                n.created_by AS n_created_by,
                n.created_at AS n_created_at,
                n.send_telegram AS n_send_telegram,
                n.send_web AS n_send_web,
                n.is_active AS n_is_active
            FROM notification_recipients r
            JOIN notifications n ON n.id = r.notification_id
            WHERE r.user_id = ?
              AND n.is_active = 1
              AND (? = 0 OR r.is_read = 0)
            ORDER BY r.id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(unread_only)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        rows.into_iter().map(InboxItem::try_from).collect()
    }

    pub async fn unread_count(pool: &SqlitePool, user_id: i64) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM notification_recipients r
            JOIN notifications n ON n.id = r.notification_id
            WHERE r.user_id = ? AND r.is_read = 0 AND n.is_active = 1
            "#,
        )
        .bind(user_id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    /// `(total, delivered_telegram, delivered_web, read)` for one notification,
    /// or across all rows when `notification_id` is `None`.
    pub async fn counts(
        pool: &SqlitePool,
        notification_id: Option<i64>,
    ) -> AppResult<(i64, i64, i64, i64)> {
        sqlx::query_as::<_, (i64, i64, i64, i64)>(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(telegram_delivered), 0),
                COALESCE(SUM(web_delivered), 0),
                COALESCE(SUM(is_read), 0)
            FROM notification_recipients
            WHERE (? IS NULL OR notification_id = ?)
            "#,
        )
        .bind(notification_id)
        .bind(notification_id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }
}
