use crate::common::error::ApiError;
use crate::web::routes::{AppState, ImamUser, OptionalAuthenticatedUser};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterTokenBody {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
    pub mosque_id: Option<String>,
    #[serde(default = "default_platform")]
    pub platform: String,
}

fn default_platform() -> String {
    "android".to_string()
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UnregisterTokenBody {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
    #[validate(length(min = 1, message = "Mosque id is required"))]
    pub mosque_id: String,
}

/// Open to authenticated and anonymous devices; a signed-in caller also
/// gets their followed mosques merged into the subscription set.
pub async fn register_token(
    State(state): State<AppState>,
    user: OptionalAuthenticatedUser,
    Json(body): Json<RegisterTokenBody>,
) -> Result<impl IntoResponse, ApiError> {
    body.validate()
        .map_err(|e| ApiError::validation(e.to_string()))?;

    state
        .services
        .subscription_service
        .register(
            &body.token,
            &body.platform,
            body.mosque_id.as_deref(),
            user.user_id.as_deref(),
        )
        .await?;

    info!(
        "Push token registered (mosque: {:?}, platform: {})",
        body.mosque_id, body.platform
    );

    Ok(Json(json!({
        "success": true,
        "message": "Push token registered successfully",
    })))
}

pub async fn unregister_token(
    State(state): State<AppState>,
    Json(body): Json<UnregisterTokenBody>,
) -> Result<impl IntoResponse, ApiError> {
    body.validate()
        .map_err(|e| ApiError::validation(e.to_string()))?;

    state
        .services
        .subscription_service
        .unregister(&body.token, &body.mosque_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Push token unregistered successfully",
    })))
}

/// Subscriber statistics for a mosque, restricted to its own imam.
pub async fn mosque_stats(
    State(state): State<AppState>,
    imam: ImamUser,
    Path(mosque_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let mosque = state
        .services
        .mosque_storage
        .find_owned(&mosque_id, &imam.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Mosque not found or you do not have permission"))?;

    let stats = state.services.subscription_service.stats(&mosque.id).await?;

    Ok(Json(json!({
        "success": true,
        "stats": stats,
    })))
}

pub fn create_notification_router() -> Router<AppState> {
    Router::new()
        .route("/api/notifications/register-token", post(register_token))
        .route(
            "/api/notifications/unregister-token",
            delete(unregister_token),
        )
        .route("/api/notifications/stats/{mosque_id}", get(mosque_stats))
}
