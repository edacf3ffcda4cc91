use crate::common::error::{ApiError, ApiResult};
use crate::services::push::is_expo_push_token;
use crate::storage::mosque::MosqueDirectory;
use crate::storage::push_token::{PushTokenRecord, RegisterTokenParams, SubscriberStats, TokenStore};
use crate::storage::user::UserDirectory;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

/// Merges a device token's mosque subscriptions with a signed-in user's
/// followed-mosque list and keeps the token record's validity state fresh.
#[derive(Clone)]
pub struct SubscriptionService {
    tokens: Arc<dyn TokenStore>,
    mosques: Arc<dyn MosqueDirectory>,
    users: Arc<dyn UserDirectory>,
}

impl SubscriptionService {
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        mosques: Arc<dyn MosqueDirectory>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            tokens,
            mosques,
            users,
        }
    }

    /// Registers or refreshes a push token. Idempotent: re-registering
    /// never loses previously held subscriptions.
    pub async fn register(
        &self,
        token: &str,
        platform: &str,
        mosque_id: Option<&str>,
        owner_id: Option<&str>,
    ) -> ApiResult<PushTokenRecord> {
        if !is_expo_push_token(token) {
            return Err(ApiError::invalid_push_token(
                "Token does not match the push gateway format",
            ));
        }

        if !matches!(platform, "ios" | "android" | "web") {
            return Err(ApiError::bad_request("Invalid platform"));
        }

        if let Some(mosque_id) = mosque_id {
            if !self.mosques.active_mosque_exists(mosque_id).await? {
                return Err(ApiError::not_found("Mosque not found"));
            }
        }

        let mut subscriptions = BTreeSet::new();
        if let Some(mosque_id) = mosque_id {
            subscriptions.insert(mosque_id.to_string());
        }
        if let Some(owner_id) = owner_id {
            subscriptions.extend(self.users.followed_mosques(owner_id).await?);
        }

        let record = self
            .tokens
            .register(RegisterTokenParams {
                token: token.to_string(),
                owner_id: owner_id.map(|o| o.to_string()),
                subscriptions: subscriptions.into_iter().collect(),
                platform: platform.to_string(),
            })
            .await?;

        info!(
            "Push token registered (mosque: {:?}, owner: {:?})",
            mosque_id, owner_id
        );
        Ok(record)
    }

    /// Removes one mosque subscription. Absent token or subscription is
    /// treated as success, and the token's validity is left untouched.
    pub async fn unregister(&self, token: &str, mosque_id: &str) -> ApiResult<()> {
        self.tokens.remove_subscription(token, mosque_id).await?;
        info!("Push token unregistered from mosque {}", mosque_id);
        Ok(())
    }

    pub async fn stats(&self, mosque_id: &str) -> ApiResult<SubscriberStats> {
        self.tokens.mosque_stats(mosque_id).await
    }
}
