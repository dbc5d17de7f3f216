use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::{InboxItem, RecipientRepository};
use crate::error::AppResult;

pub const DEFAULT_INBOX_LIMIT: i64 = 50;
pub const MAX_INBOX_LIMIT: i64 = 200;

/// A user's in-app notification list.
pub struct Inbox;

impl Inbox {
    /// List the user's inbox, newest first. Showing a row of a web-enabled
    /// notification counts as its in-app delivery.
    pub async fn list(
        pool: &SqlitePool,
        user_id: i64,
        unread_only: bool,
        limit: Option<i64>,
    ) -> AppResult<Vec<InboxItem>> {
        let limit = limit.unwrap_or(DEFAULT_INBOX_LIMIT).clamp(1, MAX_INBOX_LIMIT);
        let mut items = RecipientRepository::list_for_user(pool, user_id, unread_only, limit).await?;

        let undelivered: Vec<i64> = items
            .iter()
            .filter(|item| item.notification.send_web && !item.recipient.web_delivered)
            .map(|item| item.recipient.id)
            .collect();

        if !undelivered.is_empty() {
            let now = Utc::now().naive_utc();
            RecipientRepository::mark_web_delivered(pool, &undelivered, now).await?;

            for item in items
                .iter_mut()
                .filter(|item| undelivered.contains(&item.recipient.id))
            {
                item.recipient.web_delivered = true;
                item.recipient.web_delivered_at.get_or_insert(now);
            }
        }

        Ok(items)
    }

    pub async fn unread_count(pool: &SqlitePool, user_id: i64) -> AppResult<i64> {
        RecipientRepository::unread_count(pool, user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::*;
    use crate::db::{NewNotification, NotificationRepository, Target};
    use std::collections::BTreeSet;

    async fn notify(pool: &SqlitePool, user_id: i64, send_web: bool) -> i64 {
        let mut conn = pool.acquire().await.unwrap();
        let n = NotificationRepository::create(
            &mut conn,
            &NewNotification {
                title: "Workshop".to_string(),
                message: "Robotics workshop on Saturday".to_string(),
                notification_type: "general".to_string(),
                created_by: 1,
                target: Target::User(user_id),
                send_telegram: true,
                send_web,
            },
        )
        .await
        .unwrap();
        RecipientRepository::bulk_insert(&mut conn, n.id, &BTreeSet::from([user_id]))
            .await
            .unwrap();
        n.id
    }

    #[tokio::test]
    async fn listing_records_web_delivery_for_web_notifications_only() {
        let pool = test_pool().await;
        let user = insert_user(&pool, "Yara", "student", true).await;
        let web = notify(&pool, user, true).await;
        let push_only = notify(&pool, user, false).await;

        let items = Inbox::list(&pool, user, false, None).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].notification.id, push_only);
        assert!(!items[0].recipient.web_delivered);
        assert!(items[1].recipient.web_delivered);

        let stored = RecipientRepository::list_for_notification(&pool, web)
            .await
            .unwrap()
            .remove(0);
        assert!(stored.web_delivered);
        let first_seen = stored.web_delivered_at;
        assert!(first_seen.is_some());
        assert_eq!(items[1].recipient.web_delivered_at, first_seen);

        Inbox::list(&pool, user, false, None).await.unwrap();
        let stored = RecipientRepository::list_for_notification(&pool, web)
            .await
            .unwrap()
            .remove(0);
        assert_eq!(stored.web_delivered_at, first_seen);
    }

    #[tokio::test]
    async fn unread_count_ignores_hidden_notifications() {
        let pool = test_pool().await;
        let user = insert_user(&pool, "Yara", "student", true).await;
        notify(&pool, user, true).await;
        let hidden = notify(&pool, user, true).await;
        NotificationRepository::set_active(&pool, hidden, false)
            .await
            .unwrap();

        assert_eq!(Inbox::unread_count(&pool, user).await.unwrap(), 1);
        assert_eq!(Inbox::list(&pool, user, true, Some(1_000)).await.unwrap().len(), 1);
        // Hiding does not touch the row itself.
        let row = RecipientRepository::list_for_notification(&pool, hidden)
            .await
            .unwrap()
            .remove(0);
        assert!(!row.is_read);
    }
}
