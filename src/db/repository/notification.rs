use chrono::{NaiveDateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use crate::db::models::*;
use crate::error::{AppError, AppResult};

const NOTIFICATION_COLUMNS: &str = r#"
    id, title, message, notification_type, target_type, target_id,
    created_by, created_at, send_telegram, send_web, is_active
"#;

const INDIVIDUAL_TARGET_TYPES: [&str; 3] = ["student", "teacher", "user"];
const GROUP_TARGET_TYPES: [&str; 4] = ["all", "all_students", "all_teachers", "course"];

const MANUAL_NOTIFICATION_TYPES: [&str; 1] = ["general"];
const AUTOMATIC_NOTIFICATION_TYPES: [&str; 6] = [
    "new_lesson",
    "new_grade",
    "updated_grade",
    "new_payment",
    "payment_received",
    "payment_reminder",
];

// ============================================================================
// Notification Repository
// ============================================================================

pub struct NotificationRepository;

impl NotificationRepository {
    /// Insert a notification on the given connection. Used inside the creation
    /// transaction, so the row only becomes visible together with its recipients.
    pub async fn create(
        conn: &mut SqliteConnection,
        new: &NewNotification,
    ) -> AppResult<Notification> {
        let now = Utc::now().naive_utc();

        let row = sqlx::query_as::<_, NotificationRow>(&format!(
            r#"
            INSERT INTO notifications (
                title, message, notification_type, target_type, target_id,
                created_by, created_at, send_telegram, send_web, is_active
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
            RETURNING {}
            "#,
            NOTIFICATION_COLUMNS
        ))
        .bind(&new.title)
        .bind(&new.message)
        .bind(&new.notification_type)
        .bind(new.target.type_str())
        .bind(new.target.target_id())
        .bind(new.created_by)
        .bind(now)
        .bind(new.send_telegram)
        .bind(new.send_web)
        .fetch_one(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Notification::try_from(row)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> AppResult<Option<Notification>> {
        let row = sqlx::query_as::<_, NotificationRow>(&format!(
            "SELECT {} FROM notifications WHERE id = ?",
            NOTIFICATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        row.map(Notification::try_from).transpose()
    }

    /// Staff listing, newest first.
    pub async fn list(
        pool: &SqlitePool,
        filter: &NotificationFilter,
    ) -> AppResult<Vec<Notification>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM notifications WHERE 1 = 1",
            NOTIFICATION_COLUMNS
        ));

        match filter.notification_type.as_deref() {
            None | Some("all") => {}
            Some("manual") => {
                push_in_strings(&mut qb, "notification_type", &MANUAL_NOTIFICATION_TYPES)
            }
            Some("automatic") => {
                push_in_strings(&mut qb, "notification_type", &AUTOMATIC_NOTIFICATION_TYPES)
            }
            Some(notification_type) => {
                qb.push(" AND notification_type = ")
                    .push_bind(notification_type.to_string());
            }
        }

        match filter.target_type.as_deref() {
            None | Some("all") => {}
            Some("individual") => push_in_strings(&mut qb, "target_type", &INDIVIDUAL_TARGET_TYPES),
            Some("group") => push_in_strings(&mut qb, "target_type", &GROUP_TARGET_TYPES),
            Some(target_type) => {
                qb.push(" AND target_type = ")
                    .push_bind(target_type.to_string());
            }
        }

        if let Some(active) = filter.is_active {
            qb.push(" AND is_active = ").push_bind(active);
        }

        match filter.read_status.as_deref() {
            None | Some("all") => {}
            Some("read") => push_recipient_exists(&mut qb, "r.is_read = 1"),
            Some("unread") => push_recipient_exists(&mut qb, "r.is_read = 0"),
            Some(other) => {
                return Err(AppError::Validation(format!(
                    "Unknown read_status: {}",
                    other
                )))
            }
        }

        match filter.delivery_status.as_deref() {
            None | Some("all") => {}
            Some("telegram") => push_recipient_exists(&mut qb, "r.telegram_delivered = 1"),
            Some("web") => push_recipient_exists(&mut qb, "r.web_delivered = 1"),
            Some(other) => {
                return Err(AppError::Validation(format!(
                    "Unknown delivery_status: {}",
                    other
                )))
            }
        }

        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(filter.limit.unwrap_or(100).clamp(1, 500))
            .push(" OFFSET ")
            .push_bind(filter.offset.unwrap_or(0).max(0));

        let rows = qb
            .build_query_as::<NotificationRow>()
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)?;

        rows.into_iter().map(Notification::try_from).collect()
    }

    /// Show or hide a notification. Returns `false` if it does not exist.
    pub async fn set_active(pool: &SqlitePool, id: i64, active: bool) -> AppResult<bool> {
        let result = sqlx::query("UPDATE notifications SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    /// Flip `is_active` and return the new value, or `None` if the row is missing.
    pub async fn toggle(pool: &SqlitePool, id: i64) -> AppResult<Option<bool>> {
        sqlx::query_scalar::<_, bool>(
            "UPDATE notifications SET is_active = NOT is_active WHERE id = ? RETURNING is_active",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Set `is_active` on several notifications; only rows whose state actually
    /// changes are counted.
    pub async fn set_active_many(pool: &SqlitePool, ids: &[i64], active: bool) -> AppResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE notifications SET is_active = ");
        qb.push_bind(active)
            .push(" WHERE is_active != ")
            .push_bind(active);
        push_id_list(&mut qb, "id", ids);

        let result = qb.build().execute(pool).await.map_err(AppError::Database)?;
        Ok(result.rows_affected())
    }

    /// Delete a notification together with its recipient rows.
    pub async fn delete(pool: &SqlitePool, id: i64) -> AppResult<bool> {
        Ok(Self::delete_many(pool, &[id]).await? > 0)
    }

    /// Delete notifications and their recipients in one transaction. Returns the
    /// number of notifications removed.
    pub async fn delete_many(pool: &SqlitePool, ids: &[i64]) -> AppResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = pool.begin().await.map_err(AppError::Database)?;

        // The foreign key cascades as well; deleting explicitly keeps this
        // correct on connections opened without `foreign_keys`.
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM notification_recipients WHERE 1 = 1");
        push_id_list(&mut qb, "notification_id", ids);
        qb.build()
            .execute(&mut *tx)
            .await
            .map_err(AppError::Database)?;

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM notifications WHERE 1 = 1");
        push_id_list(&mut qb, "id", ids);
        let result = qb
            .build()
            .execute(&mut *tx)
            .await
            .map_err(AppError::Database)?;

        tx.commit().await.map_err(AppError::Database)?;
        Ok(result.rows_affected())
    }

    pub async fn overview(pool: &SqlitePool) -> AppResult<NotificationOverview> {
        let (total, active): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(is_active), 0) FROM notifications",
        )
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        let total_unread: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM notification_recipients WHERE is_read = 0")
                .fetch_one(pool)
                .await
                .map_err(AppError::Database)?;

        Ok(NotificationOverview {
            total,
            active,
            total_unread,
        })
    }

    /// Ids of active, Telegram-enabled notifications created at or after `since`
    /// that still have undelivered rows for users with a linked Telegram chat.
    pub async fn find_with_pending_telegram(
        pool: &SqlitePool,
        since: NaiveDateTime,
    ) -> AppResult<Vec<i64>> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT DISTINCT n.id
            FROM notifications n
            JOIN notification_recipients r ON r.notification_id = n.id
            JOIN bot_sessions b ON b.user_id = r.user_id AND b.is_authenticated = 1
            WHERE n.send_telegram = 1
              AND n.is_active = 1
              AND r.telegram_delivered = 0
              AND r.telegram_rejected_at IS NULL
              AND n.created_at >= ?
            ORDER BY n.id ASC
            "#,
        )
        .bind(since)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }
}

fn push_in_strings(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, values: &[&str]) {
    qb.push(format!(" AND {} IN (", column));
    let mut separated = qb.separated(", ");
    for value in values {
        separated.push_bind(value.to_string());
    }
    separated.push_unseparated(")");
}

fn push_recipient_exists(qb: &mut QueryBuilder<'_, Sqlite>, condition: &str) {
    qb.push(format!(
        " AND EXISTS (SELECT 1 FROM notification_recipients r \
         WHERE r.notification_id = notifications.id AND {})",
        condition
    ));
}

fn push_id_list(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, ids: &[i64]) {
    qb.push(format!(" AND {} IN (", column));
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
}
