use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::db::{User, UserRepository};
use crate::error::AppError;
use crate::AppState;

/// Header set by the session layer in front of this service.
pub const USER_ID_HEADER: &str = "x-user-id";

// ============================================================================
// Extractors
// ============================================================================

/// Extractor for the acting user. Missing or unknown ids are `401`, deactivated
/// accounts are `403`.
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .ok_or_else(|| {
                tracing::debug!("Missing or invalid {} header", USER_ID_HEADER);
                AppError::Unauthorized
            })?;

        let user = UserRepository::find_by_id(&state.db, user_id)
            .await?
            .ok_or_else(|| {
                tracing::debug!("Unknown acting user {}", user_id);
                AppError::Unauthorized
            })?;

        if !user.is_active {
            tracing::debug!("Deactivated user {} rejected", user_id);
            return Err(AppError::Forbidden);
        }

        Ok(AuthUser(user))
    }
}

/// Acting user with a staff role (admin or assistant).
pub struct StaffUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for StaffUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_staff() {
            return Err(AppError::Forbidden);
        }
        Ok(StaffUser(user))
    }
}

pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(AppError::Forbidden);
        }
        Ok(AdminUser(user))
    }
}
