//! Audience resolution: maps a [`Target`] to the set of users that receive it.
//!
//! Every arm applies the same eligibility rule: the user is active and does not
//! hold an excluded role (admin, assistant). A target pointing at a missing or
//! ineligible entity resolves to an empty set rather than an error.

use std::collections::BTreeSet;

use sqlx::{Sqlite, SqliteConnection};

use crate::db::models::{Target, EXCLUDED_ROLES};
use crate::error::{AppError, AppResult};

/// Appended to every query; `u` is the users table, binds are the excluded roles.
const ELIGIBLE: &str = "u.is_active = 1 AND u.role NOT IN (?, ?)";

pub struct RecipientResolver;

impl RecipientResolver {
    /// Resolve the audience on the given connection so the result is consistent
    /// with the transaction the caller is running.
    pub async fn resolve(conn: &mut SqliteConnection, target: &Target) -> AppResult<BTreeSet<i64>> {
        let (sql, id) = match *target {
            Target::All => (format!("SELECT u.id FROM users u WHERE {}", ELIGIBLE), None),
            Target::AllStudents => (
                format!(
                    "SELECT u.id FROM users u JOIN students s ON s.user_id = u.id WHERE {}",
                    ELIGIBLE
                ),
                None,
            ),
            Target::AllTeachers => (
                format!(
                    "SELECT u.id FROM users u JOIN teachers t ON t.user_id = u.id WHERE {}",
                    ELIGIBLE
                ),
                None,
            ),
            Target::Student(student_id) => (
                format!(
                    "SELECT u.id FROM students s JOIN users u ON u.id = s.user_id WHERE s.id = ? AND {}",
                    ELIGIBLE
                ),
                Some(student_id),
            ),
            Target::Teacher(teacher_id) => (
                format!(
                    "SELECT u.id FROM teachers t JOIN users u ON u.id = t.user_id WHERE t.id = ? AND {}",
                    ELIGIBLE
                ),
                Some(teacher_id),
            ),
            // Only enrollments that are currently active count; user eligibility
            // is checked once, against the users table at query time.
            Target::Course(course_id) => (
                format!(
                    r#"
                    SELECT DISTINCT u.id
                    FROM enrollments e
                    JOIN students s ON s.id = e.student_id
                    JOIN users u ON u.id = s.user_id
                    WHERE e.course_id = ? AND e.status = 'active' AND {}
                    "#,
                    ELIGIBLE
                ),
                Some(course_id),
            ),
            Target::User(user_id) => (
                format!("SELECT u.id FROM users u WHERE u.id = ? AND {}", ELIGIBLE),
                Some(user_id),
            ),
        };

        let mut query = sqlx::query_scalar::<Sqlite, i64>(&sql);
        if let Some(id) = id {
            query = query.bind(id);
        }
        let ids = query
            .bind(EXCLUDED_ROLES[0])
            .bind(EXCLUDED_ROLES[1])
            .fetch_all(&mut *conn)
            .await
            .map_err(AppError::Database)?;

        let recipients: BTreeSet<i64> = ids.into_iter().collect();

        tracing::debug!(
            "Resolved target {}({:?}) to {} recipient(s)",
            target.type_str(),
            target.target_id(),
            recipients.len()
        );

        Ok(recipients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::*;
    use sqlx::SqlitePool;

    async fn resolve(pool: &SqlitePool, target: Target) -> BTreeSet<i64> {
        let mut conn = pool.acquire().await.unwrap();
        RecipientResolver::resolve(&mut conn, &target).await.unwrap()
    }

    struct Directory {
        student: (i64, i64),
        inactive_student: (i64, i64),
        teacher: (i64, i64),
        parent: i64,
        admin: i64,
        assistant: i64,
    }

    async fn seed(pool: &SqlitePool) -> Directory {
        Directory {
            student: insert_student(pool, "Lina", true).await,
            inactive_student: insert_student(pool, "Karim", false).await,
            teacher: insert_teacher(pool, "Mr. Haddad", true).await,
            parent: insert_user(pool, "Parent", "parent", true).await,
            admin: insert_user(pool, "Admin", "admin", true).await,
            assistant: insert_user(pool, "Assistant", "assistant", true).await,
        }
    }

    #[tokio::test]
    async fn all_is_every_active_non_staff_user() {
        let pool = test_pool().await;
        let d = seed(&pool).await;

        let expected: BTreeSet<i64> = [d.student.0, d.teacher.0, d.parent].into_iter().collect();
        assert_eq!(resolve(&pool, Target::All).await, expected);
    }

    #[tokio::test]
    async fn category_targets_filter_by_profile() {
        let pool = test_pool().await;
        let d = seed(&pool).await;

        assert_eq!(
            resolve(&pool, Target::AllStudents).await,
            BTreeSet::from([d.student.0])
        );
        assert_eq!(
            resolve(&pool, Target::AllTeachers).await,
            BTreeSet::from([d.teacher.0])
        );
    }

    #[tokio::test]
    async fn single_targets_resolve_to_one_user() {
        let pool = test_pool().await;
        let d = seed(&pool).await;

        assert_eq!(
            resolve(&pool, Target::Student(d.student.1)).await,
            BTreeSet::from([d.student.0])
        );
        assert_eq!(
            resolve(&pool, Target::Teacher(d.teacher.1)).await,
            BTreeSet::from([d.teacher.0])
        );
        assert_eq!(
            resolve(&pool, Target::User(d.parent)).await,
            BTreeSet::from([d.parent])
        );
    }

    #[tokio::test]
    async fn dangling_or_ineligible_targets_resolve_to_nobody() {
        let pool = test_pool().await;
        let d = seed(&pool).await;

        assert!(resolve(&pool, Target::Student(9_999)).await.is_empty());
        assert!(resolve(&pool, Target::Student(d.inactive_student.1)).await.is_empty());
        assert!(resolve(&pool, Target::User(d.admin)).await.is_empty());
        assert!(resolve(&pool, Target::User(d.assistant)).await.is_empty());
        assert!(resolve(&pool, Target::Course(9_999)).await.is_empty());
    }

    #[tokio::test]
    async fn course_uses_active_enrollments_of_active_users() {
        let pool = test_pool().await;
        let course = insert_course(&pool, "Physics").await;
        let (a_user, a_student) = insert_student(&pool, "A", true).await;
        let (b_user, b_student) = insert_student(&pool, "B", true).await;
        let (_, inactive_student) = insert_student(&pool, "C", false).await;
        let (_, withdrawn_student) = insert_student(&pool, "D", true).await;

        enroll(&pool, a_student, course, "active").await;
        enroll(&pool, b_student, course, "active").await;
        enroll(&pool, inactive_student, course, "active").await;
        enroll(&pool, withdrawn_student, course, "withdrawn").await;

        assert_eq!(
            resolve(&pool, Target::Course(course)).await,
            BTreeSet::from([a_user, b_user])
        );
    }
}
