pub mod mosques;
pub mod notifications;

pub use mosques::create_mosque_router;
pub use notifications::create_notification_router;

use crate::auth::ROLE_IMAM;
use crate::common::error::{ApiError, ApiResult};
use crate::services::ServiceContainer;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
    routing::get,
    Json, Router,
};
use serde_json::json;

#[derive(Clone)]
pub struct AppState {
    pub services: ServiceContainer,
}

impl AppState {
    pub fn new(services: ServiceContainer) -> Self {
        Self { services }
    }
}

#[derive(Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub role: String,
}

/// Registration works for anonymous and signed-in devices alike; a bad
/// or absent token simply yields no owner.
#[derive(Clone)]
pub struct OptionalAuthenticatedUser {
    pub user_id: Option<String>,
    pub role: Option<String>,
}

#[derive(Clone)]
pub struct ImamUser {
    pub user_id: String,
}

fn extract_token_from_headers(headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
        .ok_or_else(|| ApiError::unauthorized("Missing access token"))
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let token_result = extract_token_from_headers(&parts.headers);
        let state = state.clone();

        async move {
            let token = token_result?;
            let (user_id, role) = state.services.auth_service.validate_token(&token)?;

            Ok(AuthenticatedUser { user_id, role })
        }
    }
}

impl FromRequestParts<AppState> for OptionalAuthenticatedUser {
    type Rejection = std::convert::Infallible;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let token_result = extract_token_from_headers(&parts.headers);
        let state = state.clone();

        async move {
            match token_result {
                Ok(token) => match state.services.auth_service.validate_token(&token) {
                    Ok((user_id, role)) => Ok(OptionalAuthenticatedUser {
                        user_id: Some(user_id),
                        role: Some(role),
                    }),
                    Err(_) => Ok(OptionalAuthenticatedUser {
                        user_id: None,
                        role: None,
                    }),
                },
                Err(_) => Ok(OptionalAuthenticatedUser {
                    user_id: None,
                    role: None,
                }),
            }
        }
    }
}

impl FromRequestParts<AppState> for ImamUser {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let auth_future = AuthenticatedUser::from_request_parts(parts, state);

        async move {
            let auth = auth_future.await?;
            if auth.role != ROLE_IMAM {
                return Err(ApiError::forbidden("Imam access required"));
            }
            Ok(ImamUser {
                user_id: auth.user_id,
            })
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(create_mosque_router())
        .merge(create_notification_router())
        .with_state(state)
}
