use serde::Serialize;
use sqlx::SqlitePool;

use crate::db::{NewNotification, Notification, NotificationRepository, RecipientRepository};
use crate::error::{AppError, AppResult};
use crate::services::queue::{DispatchQueue, EnqueueOutcome};
use crate::services::recipients::RecipientResolver;

#[derive(Debug, Clone, Serialize)]
pub struct CreatedNotification {
    pub notification: Notification,
    /// Recipient rows actually inserted.
    pub recipient_count: u64,
}

/// Creates notifications and fans them out to their audience.
#[derive(Clone)]
pub struct NotificationService {
    pool: SqlitePool,
    /// `None` when no Telegram bot is configured.
    dispatch: Option<DispatchQueue>,
}

impl NotificationService {
    pub fn new(pool: SqlitePool, dispatch: Option<DispatchQueue>) -> Self {
        Self { pool, dispatch }
    }

    /// Persist the notification and one recipient row per resolved user in a
    /// single transaction, then hand the id to the dispatch queue.
    ///
    /// Any failure before commit rolls the whole creation back. Telegram
    /// delivery happens in the background and never fails the creation.
    pub async fn create(&self, new: NewNotification) -> AppResult<CreatedNotification> {
        let mut tx = self.pool.begin().await.map_err(AppError::Database)?;

        let notification = NotificationRepository::create(&mut *tx, &new).await?;
        let recipients = RecipientResolver::resolve(&mut *tx, &notification.target).await?;
        let recipient_count =
            RecipientRepository::bulk_insert(&mut *tx, notification.id, &recipients).await?;

        tx.commit().await.map_err(AppError::Database)?;

        tracing::info!(
            "Notification {} ({}) created by user {} for {} recipient(s)",
            notification.id,
            notification.notification_type,
            notification.created_by,
            recipient_count
        );

        if notification.send_telegram && recipient_count > 0 {
            match &self.dispatch {
                Some(queue) => {
                    queue.enqueue(notification.id);
                }
                None => tracing::debug!(
                    "Telegram dispatch disabled; notification {} is in-app only",
                    notification.id
                ),
            }
        }

        Ok(CreatedNotification {
            notification,
            recipient_count,
        })
    }

    /// Queue a fresh dispatch run for an existing notification. Returns `None`
    /// when the notification does not use Telegram.
    pub async fn redispatch(&self, id: i64) -> AppResult<Option<EnqueueOutcome>> {
        let notification = NotificationRepository::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", id)))?;

        if !notification.send_telegram {
            return Ok(None);
        }

        let queue = self.dispatch.as_ref().ok_or_else(|| {
            AppError::ServiceUnavailable("Telegram dispatch is not configured".to_string())
        })?;

        let outcome = queue.enqueue(id);
        tracing::info!("Manual dispatch of notification {}: {:?}", id, outcome);
        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::*;
    use crate::db::Target;
    use crate::services::dispatch::DispatchMetrics;
    use std::sync::Arc;

    fn request(target: Target, send_telegram: bool) -> NewNotification {
        NewNotification {
            title: "Schedule change".to_string(),
            message: "Physics moves to room 12".to_string(),
            notification_type: "general".to_string(),
            created_by: 1,
            target,
            send_telegram,
            send_web: true,
        }
    }

    async fn count(pool: &SqlitePool, table: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn nonexistent_student_creates_notification_without_recipients() {
        let pool = test_pool().await;
        let service = NotificationService::new(pool.clone(), None);

        let created = service
            .create(request(Target::Student(9_999), true))
            .await
            .unwrap();

        assert_eq!(created.recipient_count, 0);
        assert_eq!(count(&pool, "notifications").await, 1);
        assert_eq!(count(&pool, "notification_recipients").await, 0);
    }

    #[tokio::test]
    async fn course_fan_out_creates_one_row_per_enrolled_student() {
        let pool = test_pool().await;
        let course = insert_course(&pool, "Chemistry").await;
        let (a_user, a) = insert_student(&pool, "A", true).await;
        let (b_user, b) = insert_student(&pool, "B", true).await;
        enroll(&pool, a, course, "active").await;
        enroll(&pool, b, course, "active").await;
        let service = NotificationService::new(pool.clone(), None);

        let created = service
            .create(request(Target::Course(course), false))
            .await
            .unwrap();

        assert_eq!(created.recipient_count, 2);
        let users: Vec<i64> =
            RecipientRepository::list_for_notification(&pool, created.notification.id)
                .await
                .unwrap()
                .into_iter()
                .map(|r| r.user_id)
                .collect();
        assert_eq!(users, vec![a_user, b_user]);
    }

    #[tokio::test]
    async fn failed_resolution_rolls_back_the_notification() {
        let pool = test_pool().await;
        sqlx::query("DROP TABLE enrollments")
            .execute(&pool)
            .await
            .unwrap();
        let service = NotificationService::new(pool.clone(), None);

        let err = service
            .create(request(Target::Course(1), false))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Database(_)));
        assert_eq!(count(&pool, "notifications").await, 0);
    }

    #[tokio::test]
    async fn telegram_notifications_are_queued_after_commit() {
        let pool = test_pool().await;
        let user = insert_user(&pool, "Parent", "parent", true).await;
        let (queue, mut rx) = DispatchQueue::channel(4, Arc::new(DispatchMetrics::default()));
        let service = NotificationService::new(pool.clone(), Some(queue));

        let created = service
            .create(request(Target::User(user), true))
            .await
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), created.notification.id);

        service.create(request(Target::User(user), false)).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn redispatch_checks_existence_and_channel() {
        let pool = test_pool().await;
        let user = insert_user(&pool, "Parent", "parent", true).await;
        let (queue, _rx) = DispatchQueue::channel(4, Arc::new(DispatchMetrics::default()));
        let service = NotificationService::new(pool.clone(), Some(queue));

        assert!(matches!(
            service.redispatch(42).await.unwrap_err(),
            AppError::NotFound(_)
        ));

        let web_only = service
            .create(request(Target::User(user), false))
            .await
            .unwrap();
        assert_eq!(service.redispatch(web_only.notification.id).await.unwrap(), None);

        let offline = NotificationService::new(pool.clone(), None);
        let pushed = offline
            .create(request(Target::User(user), true))
            .await
            .unwrap();
        assert!(matches!(
            offline.redispatch(pushed.notification.id).await.unwrap_err(),
            AppError::ServiceUnavailable(_)
        ));
        assert_eq!(
            service.redispatch(pushed.notification.id).await.unwrap(),
            Some(EnqueueOutcome::Queued)
        );
    }
}
