use crate::common::error::ApiResult;
use crate::common::types::PrayerTimings;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MosqueRecord {
    pub id: String,
    pub name: String,
    pub address: Option<String>,
    pub imam_id: String,
    pub timings: Json<PrayerTimings>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The one point read the notification core needs from the mosque
/// directory: does an active mosque with this id exist.
#[async_trait]
pub trait MosqueDirectory: Send + Sync {
    async fn active_mosque_exists(&self, mosque_id: &str) -> ApiResult<bool>;
}

#[derive(Debug, Clone)]
pub struct MosqueStorage {
    pool: Arc<PgPool>,
}

impl MosqueStorage {
    pub fn new(pool: &Arc<PgPool>) -> Self {
        Self { pool: pool.clone() }
    }

    pub async fn find_active(&self, mosque_id: &str) -> ApiResult<Option<MosqueRecord>> {
        let row = sqlx::query_as::<_, MosqueRecord>(
            "SELECT * FROM mosques WHERE id = $1 AND is_active",
        )
        .bind(mosque_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(row)
    }

    pub async fn find_owned(
        &self,
        mosque_id: &str,
        imam_id: &str,
    ) -> ApiResult<Option<MosqueRecord>> {
        let row = sqlx::query_as::<_, MosqueRecord>(
            "SELECT * FROM mosques WHERE id = $1 AND imam_id = $2 AND is_active",
        )
        .bind(mosque_id)
        .bind(imam_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(row)
    }

    /// Persists new timings for a mosque owned by the given imam.
    /// Returns the updated row, or None when the mosque is missing,
    /// inactive, or owned by someone else.
    pub async fn update_timings(
        &self,
        mosque_id: &str,
        imam_id: &str,
        timings: &PrayerTimings,
    ) -> ApiResult<Option<MosqueRecord>> {
        let row = sqlx::query_as::<_, MosqueRecord>(
            r#"
            UPDATE mosques
            SET timings = $3, updated_at = NOW()
            WHERE id = $1 AND imam_id = $2 AND is_active
            RETURNING *
            "#,
        )
        .bind(mosque_id)
        .bind(imam_id)
        .bind(Json(timings))
        .fetch_optional(&*self.pool)
        .await?;

        if let Some(mosque) = &row {
            info!("Prayer timings updated for mosque {}", mosque.id);
        }
        Ok(row)
    }

    pub async fn list_active(
        &self,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> ApiResult<(Vec<MosqueRecord>, i64)> {
        let pattern = search.map(|s| format!("%{}%", s));

        let rows = sqlx::query_as::<_, MosqueRecord>(
            r#"
            SELECT * FROM mosques
            WHERE is_active AND ($1::TEXT IS NULL OR name ILIKE $1 OR address ILIKE $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(&pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(&*self.pool)
        .await?;

        let (total,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM mosques
            WHERE is_active AND ($1::TEXT IS NULL OR name ILIKE $1 OR address ILIKE $1)
            "#,
        )
        .bind(&pattern)
        .fetch_one(&*self.pool)
        .await?;

        Ok((rows, total))
    }
}

#[async_trait]
impl MosqueDirectory for MosqueStorage {
    async fn active_mosque_exists(&self, mosque_id: &str) -> ApiResult<bool> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT id FROM mosques WHERE id = $1 AND is_active")
                .bind(mosque_id)
                .fetch_optional(&*self.pool)
                .await?;

        Ok(row.is_some())
    }
}
