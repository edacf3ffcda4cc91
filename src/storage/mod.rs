use crate::common::error::ApiResult;
use sqlx::PgPool;
use tracing::info;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod mosque;
pub mod push_token;
pub mod user;

pub use mosque::{MosqueDirectory, MosqueRecord, MosqueStorage};
pub use push_token::{
    token_preview, PgTokenStorage, PushTokenRecord, RegisterTokenParams, SubscriberStats,
    TokenStore,
};
pub use user::{UserDirectory, UserStorage};

/// Idempotent runtime DDL, applied at startup.
pub async fn initialize_schema(pool: &PgPool) -> ApiResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            followed_mosques TEXT[] NOT NULL DEFAULT '{}',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mosques (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            address TEXT,
            imam_id TEXT NOT NULL,
            timings JSONB NOT NULL,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_mosques_imam ON mosques (imam_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS push_tokens (
            token TEXT PRIMARY KEY,
            owner_id TEXT,
            subscriptions TEXT[] NOT NULL DEFAULT '{}',
            platform TEXT NOT NULL DEFAULT 'android',
            is_valid BOOLEAN NOT NULL DEFAULT TRUE,
            last_used_at TIMESTAMPTZ,
            failure_count INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_push_tokens_subscriptions ON push_tokens USING GIN (subscriptions)",
    )
    .execute(pool)
    .await?;

    // Serves the janitor's stale scan.
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_push_tokens_stale ON push_tokens (updated_at) WHERE NOT is_valid",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_push_tokens_owner ON push_tokens (owner_id)")
        .execute(pool)
        .await?;

    info!("Database schema initialized");
    Ok(())
}
