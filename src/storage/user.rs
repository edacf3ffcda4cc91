use crate::common::error::ApiResult;
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;

/// The one point read the notification core needs from the user
/// directory: the mosques a signed-in user follows.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn followed_mosques(&self, user_id: &str) -> ApiResult<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct UserStorage {
    pool: Arc<PgPool>,
}

impl UserStorage {
    pub fn new(pool: &Arc<PgPool>) -> Self {
        Self { pool: pool.clone() }
    }
}

#[async_trait]
impl UserDirectory for UserStorage {
    async fn followed_mosques(&self, user_id: &str) -> ApiResult<Vec<String>> {
        let row: Option<(Vec<String>,)> =
            sqlx::query_as("SELECT followed_mosques FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&*self.pool)
                .await?;

        // An unknown user contributes no subscriptions rather than failing
        // the registration.
        Ok(row.map(|r| r.0).unwrap_or_default())
    }
}
