use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Roles that never receive notifications.
pub const EXCLUDED_ROLES: [&str; 2] = ["admin", "assistant"];

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub full_name: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }

    /// Admins and assistants manage notifications.
    pub fn is_staff(&self) -> bool {
        EXCLUDED_ROLES.contains(&self.role.as_str())
    }
}
