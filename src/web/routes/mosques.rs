use crate::common::error::ApiError;
use crate::common::types::{PrayerTimings, PRAYER_TIME_RE};
use crate::web::routes::{AppState, ImamUser};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;
use validator::Validate;

#[derive(Debug, Deserialize)]
pub struct ListMosquesQuery {
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub page: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TimingsBody {
    #[validate(regex(path = *PRAYER_TIME_RE, message = "must be h:mm AM/PM"))]
    pub fajr: String,
    #[validate(regex(path = *PRAYER_TIME_RE, message = "must be h:mm AM/PM"))]
    pub dhuhr: String,
    #[validate(regex(path = *PRAYER_TIME_RE, message = "must be h:mm AM/PM"))]
    pub asr: String,
    #[validate(regex(path = *PRAYER_TIME_RE, message = "must be h:mm AM/PM"))]
    pub maghrib: String,
    #[validate(regex(path = *PRAYER_TIME_RE, message = "must be h:mm AM/PM"))]
    pub isha: String,
    #[validate(regex(path = *PRAYER_TIME_RE, message = "must be h:mm AM/PM"))]
    pub jummah: String,
}

impl From<TimingsBody> for PrayerTimings {
    fn from(body: TimingsBody) -> Self {
        Self {
            fajr: body.fajr,
            dhuhr: body.dhuhr,
            asr: body.asr,
            maghrib: body.maghrib,
            isha: body.isha,
            jummah: body.jummah,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateTimingsBody {
    #[validate(nested)]
    pub timings: TimingsBody,
}

pub async fn list_mosques(
    State(state): State<AppState>,
    Query(query): Query<ListMosquesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let page = query.page.unwrap_or(1).max(1);

    let (mosques, total) = state
        .services
        .mosque_storage
        .list_active(query.search.as_deref(), limit, (page - 1) * limit)
        .await?;

    Ok(Json(json!({
        "success": true,
        "mosques": mosques,
        "pagination": {
            "total": total,
            "page": page,
            "limit": limit,
            "pages": (total + limit - 1) / limit,
        }
    })))
}

pub async fn get_mosque(
    State(state): State<AppState>,
    Path(mosque_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let mosque = state
        .services
        .mosque_storage
        .find_active(&mosque_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Mosque not found"))?;

    Ok(Json(json!({"success": true, "mosque": mosque})))
}

/// Persists new timings and kicks off the notification fan-out. The
/// fan-out is fire-and-forget: the imam sees success as soon as the
/// update is stored, and dispatch errors only reach the logs.
pub async fn update_timings(
    State(state): State<AppState>,
    imam: ImamUser,
    Path(mosque_id): Path<String>,
    Json(body): Json<UpdateTimingsBody>,
) -> Result<impl IntoResponse, ApiError> {
    body.validate()
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let timings: PrayerTimings = body.timings.into();

    let mosque = state
        .services
        .mosque_storage
        .update_timings(&mosque_id, &imam.user_id, &timings)
        .await?
        .ok_or_else(|| {
            ApiError::not_found("Mosque not found or you do not have permission to update it")
        })?;

    let notifications = state.services.notification_service.clone();
    let dispatch_id = mosque.id.clone();
    let dispatch_name = mosque.name.clone();
    let dispatch_timings = timings.clone();
    tokio::spawn(async move {
        if let Err(e) = notifications
            .dispatch_mosque_update(&dispatch_id, &dispatch_name, &dispatch_timings)
            .await
        {
            error!("Error sending notifications: {}", e);
        }
    });

    Ok(Json(json!({
        "success": true,
        "message": "Timings updated successfully",
        "mosque": {
            "id": mosque.id,
            "name": mosque.name,
            "timings": mosque.timings,
            "lastUpdated": mosque.updated_at,
        }
    })))
}

pub fn create_mosque_router() -> Router<AppState> {
    Router::new()
        .route("/api/mosques", get(list_mosques))
        .route("/api/mosques/{id}", get(get_mosque))
        .route("/api/mosques/{id}/timings", put(update_timings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timings_body_validation() {
        let valid = TimingsBody {
            fajr: "05:30 AM".to_string(),
            dhuhr: "01:15 PM".to_string(),
            asr: "04:45 PM".to_string(),
            maghrib: "06:50 PM".to_string(),
            isha: "08:10 PM".to_string(),
            jummah: "01:30 PM".to_string(),
        };
        assert!(valid.validate().is_ok());

        let invalid = TimingsBody {
            fajr: "25:00".to_string(),
            ..valid
        };
        assert!(invalid.validate().is_err());
    }
}
