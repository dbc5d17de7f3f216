use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::{
    InboxItem, NewNotification, Notification, NotificationFilter, NotificationOverview,
    NotificationRecipient, NotificationRepository, NotificationStats, Target,
};
use crate::error::{AppError, AppResult};
use crate::routes::auth::{AdminUser, AuthUser, StaffUser};
use crate::services::dispatch::DispatchMetricsSnapshot;
use crate::services::inbox::Inbox;
use crate::services::notifications::CreatedNotification;
use crate::services::queue::EnqueueOutcome;
use crate::services::read_tracker::ReadTracker;
use crate::services::stats::StatsAggregator;
use crate::AppState;

const MAX_TITLE_CHARS: usize = 200;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_notification).get(list_notifications))
        .route("/overview", get(get_overview))
        .route("/metrics", get(get_dispatch_metrics))
        .route("/bulk", post(bulk_action))
        .route("/inbox", get(list_inbox))
        .route("/inbox/unread-count", get(get_unread_count))
        .route("/inbox/read-all", post(mark_all_read))
        .route("/inbox/:recipient_id/read", post(mark_read))
        .route(
            "/:id",
            get(get_notification).delete(delete_notification),
        )
        .route("/:id/stats", get(get_notification_stats))
        .route("/:id/toggle", post(toggle_notification))
        .route("/:id/dispatch", post(dispatch_notification))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateNotificationRequest {
    pub title: String,
    pub message: String,
    #[serde(default = "default_notification_type")]
    pub notification_type: String,
    pub target_type: String,
    pub target_id: Option<i64>,
    #[serde(default = "default_true")]
    pub send_telegram: bool,
    #[serde(default = "default_true")]
    pub send_web: bool,
}

fn default_notification_type() -> String {
    "general".to_string()
}

fn default_true() -> bool {
    true
}

impl CreateNotificationRequest {
    fn into_new_notification(self, created_by: i64) -> AppResult<NewNotification> {
        let title = self.title.trim().to_string();
        let message = self.message.trim().to_string();

        if title.is_empty() {
            return Err(AppError::Validation("title must not be empty".to_string()));
        }
        if title.chars().count() > MAX_TITLE_CHARS {
            return Err(AppError::Validation(format!(
                "title must be at most {} characters",
                MAX_TITLE_CHARS
            )));
        }
        if message.is_empty() {
            return Err(AppError::Validation("message must not be empty".to_string()));
        }
        if !self.send_telegram && !self.send_web {
            return Err(AppError::Validation(
                "at least one of send_telegram / send_web must be enabled".to_string(),
            ));
        }

        Ok(NewNotification {
            title,
            message,
            notification_type: self.notification_type,
            created_by,
            target: Target::from_parts(&self.target_type, self.target_id)?,
            send_telegram: self.send_telegram,
            send_web: self.send_web,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct InboxQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct InboxResponse {
    pub items: Vec<InboxItem>,
    pub unread_count: i64,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub unread_count: i64,
}

#[derive(Debug, Serialize)]
pub struct AffectedResponse {
    pub affected: u64,
}

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub id: i64,
    pub is_active: bool,
}

#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub id: i64,
    /// "queued", "duplicate", "dropped", or "skipped" when Telegram is off for it.
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct OverviewResponse {
    #[serde(flatten)]
    pub overview: NotificationOverview,
    pub recipients: NotificationStats,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub telegram_enabled: bool,
    pub dispatch: Option<DispatchMetricsSnapshot>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    Activate,
    Deactivate,
    Delete,
}

#[derive(Debug, Deserialize)]
pub struct BulkActionRequest {
    pub action: BulkAction,
    pub ids: Vec<i64>,
}

// ============================================================================
// Inbox Handlers
// ============================================================================

/// The acting user's notifications, newest first.
async fn list_inbox(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<InboxQuery>,
) -> AppResult<Json<InboxResponse>> {
    let items = Inbox::list(&state.db, user.id, query.unread_only, query.limit).await?;
    let unread_count = Inbox::unread_count(&state.db, user.id).await?;

    Ok(Json(InboxResponse {
        items,
        unread_count,
    }))
}

async fn get_unread_count(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<UnreadCountResponse>> {
    let unread_count = Inbox::unread_count(&state.db, user.id).await?;
    Ok(Json(UnreadCountResponse { unread_count }))
}

async fn mark_read(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(recipient_id): Path<i64>,
) -> AppResult<Json<NotificationRecipient>> {
    let recipient = ReadTracker::mark_read(&state.db, recipient_id, user.id).await?;
    Ok(Json(recipient))
}

async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<AffectedResponse>> {
    let affected = ReadTracker::mark_all_read(&state.db, user.id).await?;
    Ok(Json(AffectedResponse { affected }))
}

// ============================================================================
// Staff Handlers
// ============================================================================

async fn create_notification(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    Json(request): Json<CreateNotificationRequest>,
) -> AppResult<(StatusCode, Json<CreatedNotification>)> {
    let new = request.into_new_notification(user.id)?;
    let created = state.notifications.create(new).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_notifications(
    State(state): State<Arc<AppState>>,
    StaffUser(_user): StaffUser,
    Query(filter): Query<NotificationFilter>,
) -> AppResult<Json<Vec<Notification>>> {
    let notifications = NotificationRepository::list(&state.db, &filter).await?;
    Ok(Json(notifications))
}

async fn get_notification(
    State(state): State<Arc<AppState>>,
    StaffUser(_user): StaffUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Notification>> {
    NotificationRepository::find_by_id(&state.db, id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", id)))
}

async fn get_notification_stats(
    State(state): State<Arc<AppState>>,
    StaffUser(_user): StaffUser,
    Path(id): Path<i64>,
) -> AppResult<Json<NotificationStats>> {
    let stats = StatsAggregator::stats(&state.db, id).await?;
    Ok(Json(stats))
}

async fn toggle_notification(
    State(state): State<Arc<AppState>>,
    StaffUser(user): StaffUser,
    Path(id): Path<i64>,
) -> AppResult<Json<ToggleResponse>> {
    let is_active = NotificationRepository::toggle(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", id)))?;

    tracing::info!(
        "User {} set notification {} active={}",
        user.id,
        id,
        is_active
    );
    Ok(Json(ToggleResponse { id, is_active }))
}

async fn dispatch_notification(
    State(state): State<Arc<AppState>>,
    StaffUser(_user): StaffUser,
    Path(id): Path<i64>,
) -> AppResult<(StatusCode, Json<DispatchResponse>)> {
    let status = match state.notifications.redispatch(id).await? {
        Some(EnqueueOutcome::Queued) => "queued",
        Some(EnqueueOutcome::Duplicate) => "duplicate",
        Some(EnqueueOutcome::Dropped) => "dropped",
        None => "skipped",
    };
    Ok((StatusCode::ACCEPTED, Json(DispatchResponse { id, status })))
}

async fn get_overview(
    State(state): State<Arc<AppState>>,
    StaffUser(_user): StaffUser,
) -> AppResult<Json<OverviewResponse>> {
    let (overview, recipients) = tokio::try_join!(
        NotificationRepository::overview(&state.db),
        StatsAggregator::global(&state.db)
    )?;
    Ok(Json(OverviewResponse {
        overview,
        recipients,
    }))
}

async fn get_dispatch_metrics(
    State(state): State<Arc<AppState>>,
    StaffUser(_user): StaffUser,
) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        telegram_enabled: state.dispatch.is_some(),
        dispatch: state.dispatch.as_ref().map(|q| q.metrics().snapshot()),
    })
}

// ============================================================================
// Admin Handlers
// ============================================================================

async fn delete_notification(
    State(state): State<Arc<AppState>>,
    AdminUser(user): AdminUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    if !NotificationRepository::delete(&state.db, id).await? {
        return Err(AppError::NotFound(format!("Notification {} not found", id)));
    }
    tracing::info!("User {} deleted notification {}", user.id, id);
    Ok(StatusCode::NO_CONTENT)
}

async fn bulk_action(
    State(state): State<Arc<AppState>>,
    AdminUser(user): AdminUser,
    Json(request): Json<BulkActionRequest>,
) -> AppResult<Json<AffectedResponse>> {
    if request.ids.is_empty() {
        return Err(AppError::BadRequest("ids must not be empty".to_string()));
    }

    let affected = match request.action {
        BulkAction::Activate => {
            NotificationRepository::set_active_many(&state.db, &request.ids, true).await?
        }
        BulkAction::Deactivate => {
            NotificationRepository::set_active_many(&state.db, &request.ids, false).await?
        }
        BulkAction::Delete => NotificationRepository::delete_many(&state.db, &request.ids).await?,
    };

    tracing::info!(
        "User {} applied {:?} to {} notification(s)",
        user.id,
        request.action,
        affected
    );
    Ok(Json(AffectedResponse { affected }))
}
