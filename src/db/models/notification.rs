use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::AppError;

/// Audience of a notification.
///
/// Persisted as a `target_type` string plus an optional `target_id`; on the wire
/// it is `{"target_type": "course", "target_id": 3}` (no `target_id` for the
/// audience-wide variants).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "target_type", content = "target_id", rename_all = "snake_case")]
pub enum Target {
    All,
    AllStudents,
    AllTeachers,
    Student(i64),
    Teacher(i64),
    Course(i64),
    User(i64),
}

impl Target {
    pub fn type_str(&self) -> &'static str {
        match self {
            Target::All => "all",
            Target::AllStudents => "all_students",
            Target::AllTeachers => "all_teachers",
            Target::Student(_) => "student",
            Target::Teacher(_) => "teacher",
            Target::Course(_) => "course",
            Target::User(_) => "user",
        }
    }

    pub fn target_id(&self) -> Option<i64> {
        match *self {
            Target::All | Target::AllStudents | Target::AllTeachers => None,
            Target::Student(id) | Target::Teacher(id) | Target::Course(id) | Target::User(id) => {
                Some(id)
            }
        }
    }

    /// Rebuild a target from its persisted columns.
    pub fn from_parts(target_type: &str, target_id: Option<i64>) -> Result<Self, AppError> {
        let require_id = || {
            target_id.ok_or_else(|| {
                AppError::Validation(format!("target_type '{}' requires a target_id", target_type))
            })
        };

        match target_type {
            "all" => Ok(Target::All),
            "all_students" => Ok(Target::AllStudents),
            "all_teachers" => Ok(Target::AllTeachers),
            "student" => Ok(Target::Student(require_id()?)),
            "teacher" => Ok(Target::Teacher(require_id()?)),
            "course" => Ok(Target::Course(require_id()?)),
            "user" => Ok(Target::User(require_id()?)),
            other => Err(AppError::Validation(format!(
                "Unknown target_type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: i64,
    pub title: String,
    pub message: String,
    /// Free-form classifier ("general", "new_grade", "payment_reminder", ...).
    pub notification_type: String,
    pub target: Target,
    pub created_by: i64,
    pub created_at: NaiveDateTime,
    pub send_telegram: bool,
    pub send_web: bool,
    pub is_active: bool,
}

// Intermediate structure for reading from DB (target stored as two columns)
#[derive(Debug, FromRow)]
pub(crate) struct NotificationRow {
    pub id: i64,
    pub title: String,
    pub message: String,
    pub notification_type: String,
    pub target_type: String,
    pub target_id: Option<i64>,
    pub created_by: i64,
    pub created_at: NaiveDateTime,
    pub send_telegram: bool,
    pub send_web: bool,
    pub is_active: bool,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = AppError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let target = Target::from_parts(&row.target_type, row.target_id).map_err(|e| {
            AppError::Internal(anyhow::anyhow!(
                "notification {} has an unreadable target: {}",
                row.id,
                e
            ))
        })?;

        Ok(Notification {
            id: row.id,
            title: row.title,
            message: row.message,
            notification_type: row.notification_type,
            target,
            created_by: row.created_by,
            created_at: row.created_at,
            send_telegram: row.send_telegram,
            send_web: row.send_web,
            is_active: row.is_active,
        })
    }
}

/// Data required to create a notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    pub title: String,
    pub message: String,
    pub notification_type: String,
    pub created_by: i64,
    pub target: Target,
    pub send_telegram: bool,
    pub send_web: bool,
}

/// Filters for the staff notification listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationFilter {
    /// A concrete type, or the groupings "manual" / "automatic".
    pub notification_type: Option<String>,
    /// A concrete target type, or the groupings "individual" / "group".
    pub target_type: Option<String>,
    pub is_active: Option<bool>,
    /// "read" keeps notifications with at least one read recipient, "unread"
    /// those with at least one unread recipient.
    pub read_status: Option<String>,
    /// "telegram" or "web": at least one recipient delivered on that channel.
    pub delivery_status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Dashboard counters across all notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NotificationOverview {
    pub total: i64,
    pub active: i64,
    pub total_unread: i64,
}
