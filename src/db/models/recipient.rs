use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::FromRow;

use crate::db::models::{Notification, NotificationRow};
use crate::error::AppError;

/// Per-user delivery and read state for one notification.
///
/// All three flags only ever move from `false` to `true`; the matching
/// timestamp is written together with the first transition and never again.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct NotificationRecipient {
    pub id: i64,
    pub notification_id: i64,
    pub user_id: i64,
    pub is_read: bool,
    pub read_at: Option<NaiveDateTime>,
    pub telegram_delivered: bool,
    pub telegram_delivered_at: Option<NaiveDateTime>,
    /// Message id assigned by Telegram to the push.
    pub telegram_message_id: Option<i64>,
    pub web_delivered: bool,
    pub web_delivered_at: Option<NaiveDateTime>,
}

/// A recipient row joined with its notification, as shown in a user's inbox.
#[derive(Debug, Clone, Serialize)]
pub struct InboxItem {
    pub recipient: NotificationRecipient,
    pub notification: Notification,
}

// Flat join row; columns of the notification side are prefixed with `n_`.
#[derive(Debug, FromRow)]
pub(crate) struct InboxRow {
    pub id: i64,
    pub notification_id: i64,
    pub user_id: i64,
    pub is_read: bool,
    pub read_at: Option<NaiveDateTime>,
    pub telegram_delivered: bool,
    pub telegram_delivered_at: Option<NaiveDateTime>,
    pub telegram_message_id: Option<i64>,
    pub web_delivered: bool,
    pub web_delivered_at: Option<NaiveDateTime>,
    pub n_title: String,
    pub n_message: String,
    pub n_notification_type: String,
    pub n_target_type: String,
    pub n_target_id: Option<i64>,
    pub n_created_by: i64,
    pub n_created_at: NaiveDateTime,
    pub n_send_telegram: bool,
    pub n_send_web: bool,
    pub n_is_active: bool,
}

impl TryFrom<InboxRow> for InboxItem {
    type Error = AppError;

    fn try_from(row: InboxRow) -> Result<Self, Self::Error> {
        let notification = Notification::try_from(NotificationRow {
            id: row.notification_id,
            title: row.n_title,
            message: row.n_message,
            notification_type: row.n_notification_type,
            target_type: row.n_target_type,
            target_id: row.n_target_id,
            created_by: row.n_created_by,
            created_at: row.n_created_at,
            send_telegram: row.n_send_telegram,
            send_web: row.n_send_web,
            is_active: row.n_is_active,
        })?;

        Ok(InboxItem {
            recipient: NotificationRecipient {
                id: row.id,
                notification_id: row.notification_id,
                user_id: row.user_id,
                is_read: row.is_read,
                read_at: row.read_at,
                telegram_delivered: row.telegram_delivered,
                telegram_delivered_at: row.telegram_delivered_at,
                telegram_message_id: row.telegram_message_id,
                web_delivered: row.web_delivered,
                web_delivered_at: row.web_delivered_at,
            },
            notification,
        })
    }
}

/// Delivery and read figures for a set of recipient rows.
///
/// Rates are percentages of `total` and are `0.0` when there are no rows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NotificationStats {
    pub total: i64,
    pub delivered_telegram: i64,
    pub delivered_web: i64,
    pub read: i64,
    pub unread: i64,
    pub delivery_rate_telegram: f64,
    pub delivery_rate_web: f64,
    pub read_rate: f64,
}

impl NotificationStats {
    pub fn from_counts(total: i64, delivered_telegram: i64, delivered_web: i64, read: i64) -> Self {
        let rate = |part: i64| {
            if total > 0 {
                part as f64 * 100.0 / total as f64
            } else {
                0.0
            }
        };

        NotificationStats {
            total,
            delivered_telegram,
            delivered_web,
            read,
            unread: total - read,
            delivery_rate_telegram: rate(delivered_telegram),
            delivery_rate_web: rate(delivered_web),
            read_rate: rate(read),
        }
    }
}
