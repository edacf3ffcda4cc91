use crate::common::error::ApiResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PushTokenRecord {
    pub token: String,
    pub owner_id: Option<String>,
    pub subscriptions: Vec<String>,
    pub platform: String,
    pub is_valid: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub failure_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RegisterTokenParams {
    pub token: String,
    pub owner_id: Option<String>,
    /// Deduplicated mosque ids to union into the existing subscription set.
    pub subscriptions: Vec<String>,
    pub platform: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriberStats {
    pub total: i64,
    pub active: i64,
    pub inactive: i64,
    pub platforms: HashMap<String, i64>,
}

/// Shortened token for log lines; full tokens are device credentials.
pub fn token_preview(token: &str) -> String {
    let prefix: String = token.chars().take(20).collect();
    format!("{}...", prefix)
}

/// Persisted token -> subscription-set mapping. Every mutation is an
/// independent per-token conditional update, tolerant of concurrent
/// writers; no cross-token transactions.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// All valid tokens subscribed to the given mosque.
    async fn find_by_mosque(&self, mosque_id: &str) -> ApiResult<Vec<PushTokenRecord>>;

    async fn find_by_token(&self, token: &str) -> ApiResult<Option<PushTokenRecord>>;

    /// Upsert that merges subscriptions (set union), resets validity and
    /// the failure counter, and refreshes `last_used_at`.
    async fn register(&self, params: RegisterTokenParams) -> ApiResult<PushTokenRecord>;

    /// Removes one mosque from the token's subscription set. No-op when
    /// the token or the subscription is absent.
    async fn remove_subscription(&self, token: &str, mosque_id: &str) -> ApiResult<()>;

    /// Flips `is_valid` off and increments `failure_count`. The counter
    /// increments on every call, including repeat calls on an
    /// already-invalid token.
    async fn mark_invalid(&self, token: &str) -> ApiResult<()>;

    /// Deletes invalid tokens not touched since `cutoff`. Returns the
    /// deleted count.
    async fn delete_stale(&self, cutoff: DateTime<Utc>) -> ApiResult<u64>;

    async fn mosque_stats(&self, mosque_id: &str) -> ApiResult<SubscriberStats>;
}

#[derive(Debug, Clone)]
pub struct PgTokenStorage {
    pool: Arc<PgPool>,
}

impl PgTokenStorage {
    pub fn new(pool: &Arc<PgPool>) -> Self {
        Self { pool: pool.clone() }
    }
}

#[async_trait]
impl TokenStore for PgTokenStorage {
    async fn find_by_mosque(&self, mosque_id: &str) -> ApiResult<Vec<PushTokenRecord>> {
        let rows = sqlx::query_as::<_, PushTokenRecord>(
            "SELECT * FROM push_tokens WHERE subscriptions @> ARRAY[$1] AND is_valid",
        )
        .bind(mosque_id)
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows)
    }

    async fn find_by_token(&self, token: &str) -> ApiResult<Option<PushTokenRecord>> {
        let row = sqlx::query_as::<_, PushTokenRecord>(
            "SELECT * FROM push_tokens WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(row)
    }

    async fn register(&self, params: RegisterTokenParams) -> ApiResult<PushTokenRecord> {
        let row = sqlx::query_as::<_, PushTokenRecord>(
            r#"
            INSERT INTO push_tokens (
                token, owner_id, subscriptions, platform, is_valid,
                last_used_at, failure_count, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, TRUE, NOW(), 0, NOW(), NOW())
            ON CONFLICT (token) DO UPDATE SET
                subscriptions = ARRAY(
                    SELECT DISTINCT s
                    FROM unnest(push_tokens.subscriptions || EXCLUDED.subscriptions) AS s
                    ORDER BY s
                ),
                owner_id = COALESCE(EXCLUDED.owner_id, push_tokens.owner_id),
                platform = EXCLUDED.platform,
                is_valid = TRUE,
                failure_count = 0,
                last_used_at = NOW(),
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(&params.token)
        .bind(&params.owner_id)
        .bind(&params.subscriptions)
        .bind(&params.platform)
        .fetch_one(&*self.pool)
        .await?;

        info!(
            "Registered push token {} ({} subscriptions)",
            token_preview(&row.token),
            row.subscriptions.len()
        );
        Ok(row)
    }

    async fn remove_subscription(&self, token: &str, mosque_id: &str) -> ApiResult<()> {
        sqlx::query(
            r#"
            UPDATE push_tokens
            SET subscriptions = array_remove(subscriptions, $2), updated_at = NOW()
            WHERE token = $1
            "#,
        )
        .bind(token)
        .bind(mosque_id)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    async fn mark_invalid(&self, token: &str) -> ApiResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE push_tokens
            SET is_valid = FALSE, failure_count = failure_count + 1, updated_at = NOW()
            WHERE token = $1
            "#,
        )
        .bind(token)
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() > 0 {
            info!("Marked token as invalid: {}", token_preview(token));
        }
        Ok(())
    }

    async fn delete_stale(&self, cutoff: DateTime<Utc>) -> ApiResult<u64> {
        let result = sqlx::query("DELETE FROM push_tokens WHERE NOT is_valid AND updated_at < $1")
            .bind(cutoff)
            .execute(&*self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn mosque_stats(&self, mosque_id: &str) -> ApiResult<SubscriberStats> {
        let (total, active, inactive): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (WHERE is_valid),
                COUNT(*) FILTER (WHERE NOT is_valid)
            FROM push_tokens
            WHERE subscriptions @> ARRAY[$1]
            "#,
        )
        .bind(mosque_id)
        .fetch_one(&*self.pool)
        .await?;

        let platform_rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT platform, COUNT(*)
            FROM push_tokens
            WHERE subscriptions @> ARRAY[$1] AND is_valid
            GROUP BY platform
            "#,
        )
        .bind(mosque_id)
        .fetch_all(&*self.pool)
        .await?;

        Ok(SubscriberStats {
            total,
            active,
            inactive,
            platforms: platform_rows.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_preview_truncates() {
        let token = "ExponentPushToken[abcdefghijklmnop]";
        let preview = token_preview(token);
        assert_eq!(preview, "ExponentPushToken[ab...");
        assert_eq!(token_preview("short"), "short...");
    }
}
