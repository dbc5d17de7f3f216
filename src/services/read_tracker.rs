use sqlx::SqlitePool;

use crate::db::{NotificationRecipient, RecipientRepository};
use crate::error::{AppError, AppResult};

/// Read-state transitions on behalf of the owning user.
pub struct ReadTracker;

impl ReadTracker {
    /// Mark one recipient row as read. A row that is already read is returned
    /// as is; its `read_at` is never rewritten.
    pub async fn mark_read(
        pool: &SqlitePool,
        recipient_id: i64,
        acting_user_id: i64,
    ) -> AppResult<NotificationRecipient> {
        let recipient = RecipientRepository::find_by_id(pool, recipient_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Recipient {} not found", recipient_id)))?;

        if recipient.user_id != acting_user_id {
            tracing::warn!(
                "User {} tried to mark recipient {} owned by user {} as read",
                acting_user_id,
                recipient_id,
                recipient.user_id
            );
            return Err(AppError::Forbidden);
        }

        if recipient.is_read {
            return Ok(recipient);
        }

        if !RecipientRepository::mark_read(pool, recipient_id).await? {
            tracing::debug!("Recipient {} was marked read concurrently", recipient_id);
        }

        RecipientRepository::find_by_id(pool, recipient_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Recipient {} not found", recipient_id)))
    }

    pub async fn mark_all_read(pool: &SqlitePool, user_id: i64) -> AppResult<u64> {
        let updated = RecipientRepository::mark_all_read(pool, user_id).await?;
        tracing::debug!("Marked {} notification(s) read for user {}", updated, user_id);
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::*;
    use crate::db::{NewNotification, NotificationRepository, Target};
    use std::collections::BTreeSet;

    async fn recipient_for(pool: &SqlitePool, user_id: i64) -> (i64, i64) {
        let mut conn = pool.acquire().await.unwrap();
        let n = NotificationRepository::create(
            &mut conn,
            &NewNotification {
                title: "Fees".to_string(),
                message: "Installment due next week".to_string(),
                notification_type: "payment_reminder".to_string(),
                created_by: 1,
                target: Target::User(user_id),
                send_telegram: false,
                send_web: true,
            },
        )
        .await
        .unwrap();
        RecipientRepository::bulk_insert(&mut conn, n.id, &BTreeSet::from([user_id]))
            .await
            .unwrap();
        drop(conn);

        let row = RecipientRepository::list_for_notification(pool, n.id)
            .await
            .unwrap()
            .remove(0);
        (n.id, row.id)
    }

    #[tokio::test]
    async fn mark_read_is_idempotent() {
        let pool = test_pool().await;
        let user = insert_user(&pool, "Sara", "student", true).await;
        let (_, recipient) = recipient_for(&pool, user).await;

        let first = ReadTracker::mark_read(&pool, recipient, user).await.unwrap();
        assert!(first.is_read);
        assert!(first.read_at.is_some());

        let second = ReadTracker::mark_read(&pool, recipient, user).await.unwrap();
        assert_eq!(second.read_at, first.read_at);
    }

    #[tokio::test]
    async fn only_the_owner_may_mark_read() {
        let pool = test_pool().await;
        let owner = insert_user(&pool, "Sara", "student", true).await;
        let other = insert_user(&pool, "Nadia", "student", true).await;
        let (_, recipient) = recipient_for(&pool, owner).await;

        let err = ReadTracker::mark_read(&pool, recipient, other).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
        assert!(!RecipientRepository::find_by_id(&pool, recipient)
            .await
            .unwrap()
            .unwrap()
            .is_read);

        let err = ReadTracker::mark_read(&pool, recipient + 100, owner).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn mark_all_read_skips_hidden_and_read_rows() {
        let pool = test_pool().await;
        let user = insert_user(&pool, "Sara", "student", true).await;
        let (_, already_read) = recipient_for(&pool, user).await;
        let (hidden_notification, hidden) = recipient_for(&pool, user).await;
        let (_, unread) = recipient_for(&pool, user).await;

        let before = ReadTracker::mark_read(&pool, already_read, user).await.unwrap();
        NotificationRepository::set_active(&pool, hidden_notification, false)
            .await
            .unwrap();

        assert_eq!(ReadTracker::mark_all_read(&pool, user).await.unwrap(), 1);

        let find = |id| RecipientRepository::find_by_id(&pool, id);
        assert!(find(unread).await.unwrap().unwrap().is_read);
        assert!(!find(hidden).await.unwrap().unwrap().is_read);
        assert_eq!(find(already_read).await.unwrap().unwrap().read_at, before.read_at);
    }
}
