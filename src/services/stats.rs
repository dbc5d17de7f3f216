use sqlx::SqlitePool;

use crate::db::{NotificationRepository, NotificationStats, RecipientRepository};
use crate::error::{AppError, AppResult};

/// Read-only delivery and engagement figures.
pub struct StatsAggregator;

impl StatsAggregator {
    pub async fn stats(pool: &SqlitePool, notification_id: i64) -> AppResult<NotificationStats> {
        if NotificationRepository::find_by_id(pool, notification_id)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound(format!(
                "Notification {} not found",
                notification_id
            )));
        }

        let (total, telegram, web, read) =
            RecipientRepository::counts(pool, Some(notification_id)).await?;
        Ok(NotificationStats::from_counts(total, telegram, web, read))
    }

    /// Same figures across every recipient row.
    pub async fn global(pool: &SqlitePool) -> AppResult<NotificationStats> {
        let (total, telegram, web, read) = RecipientRepository::counts(pool, None).await?;
        Ok(NotificationStats::from_counts(total, telegram, web, read))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::*;
    use crate::db::{NewNotification, Target};
    use std::collections::BTreeSet;

    #[tokio::test]
    async fn rates_follow_recipient_flags() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let n = NotificationRepository::create(
            &mut conn,
            &NewNotification {
                title: "Results".to_string(),
                message: "Final results are out".to_string(),
                notification_type: "new_grade".to_string(),
                created_by: 1,
                target: Target::All,
                send_telegram: true,
                send_web: true,
            },
        )
        .await
        .unwrap();
        let users: BTreeSet<i64> = (1..=10).collect();
        RecipientRepository::bulk_insert(&mut conn, n.id, &users)
            .await
            .unwrap();
        drop(conn);

        let rows = RecipientRepository::list_for_notification(&pool, n.id)
            .await
            .unwrap();
        for (i, row) in rows.iter().enumerate() {
            if i < 4 {
                RecipientRepository::mark_telegram_delivered(&pool, row.id, 100 + i as i64)
                    .await
                    .unwrap();
            }
            if i < 6 {
                RecipientRepository::mark_read(&pool, row.id).await.unwrap();
            }
        }

        let stats = StatsAggregator::stats(&pool, n.id).await.unwrap();
        assert_eq!(stats.total, 10);
        assert_eq!(stats.delivered_telegram, 4);
        assert_eq!(stats.delivery_rate_telegram, 40.0);
        assert_eq!(stats.read_rate, 60.0);
        assert_eq!(stats.unread, 4);
        assert_eq!(stats.delivered_web, 0);

        let global = StatsAggregator::global(&pool).await.unwrap();
        assert_eq!(global, stats);
    }

    #[tokio::test]
    async fn missing_notification_is_not_found() {
        let pool = test_pool().await;
        assert!(matches!(
            StatsAggregator::stats(&pool, 1).await.unwrap_err(),
            AppError::NotFound(_)
        ));
        assert_eq!(StatsAggregator::global(&pool).await.unwrap().total, 0);
    }
}
