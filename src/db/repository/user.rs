use sqlx::SqlitePool;

use crate::db::models::*;
use crate::error::{AppError, AppResult};

// ============================================================================
// User Repository
// ============================================================================

/// Read-only access to the institute's user directory.
pub struct UserRepository;

impl UserRepository {
    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> AppResult<Option<User>> {
        sqlx::query_as::<_, User>(
            "SELECT id, full_name, role, is_active, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }
}

// ============================================================================
// Bot Session Repository
// ============================================================================

/// Lookups against the Telegram bot's session table.
pub struct BotSessionRepository;

impl BotSessionRepository {
    /// Telegram chat id of the user's authenticated bot session, if any.
    /// The most recently active session wins when a user has several.
    pub async fn find_chat_id(pool: &SqlitePool, user_id: i64) -> AppResult<Option<i64>> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT telegram_id FROM bot_sessions
            WHERE user_id = ? AND is_authenticated = 1
            ORDER BY last_activity DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::*;

    #[tokio::test]
    async fn find_user_reports_role() {
        let pool = test_pool().await;
        let id = insert_user(&pool, "Admin", "admin", true).await;

        let user = UserRepository::find_by_id(&pool, id).await.unwrap().unwrap();
        assert!(user.is_admin());
        assert!(user.is_staff());
        assert!(UserRepository::find_by_id(&pool, id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unauthenticated_sessions_are_ignored() {
        let pool = test_pool().await;
        let user = insert_user(&pool, "Omar", "student", true).await;
        sqlx::query(
            "INSERT INTO bot_sessions (telegram_id, user_id, is_authenticated) VALUES (111, ?, 0)",
        )
        .bind(user)
        .execute(&pool)
        .await
        .unwrap();

        assert_eq!(BotSessionRepository::find_chat_id(&pool, user).await.unwrap(), None);

        link_telegram(&pool, user, 222).await;
        assert_eq!(
            BotSessionRepository::find_chat_id(&pool, user).await.unwrap(),
            Some(222)
        );
    }
}
