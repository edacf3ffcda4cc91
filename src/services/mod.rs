use crate::auth::AuthService;
use crate::common::config::Config;
use crate::services::notification_service::DispatchSettings;
use crate::services::push::{ExpoPushGateway, PushTransport};
use crate::storage::{MosqueStorage, PgTokenStorage, TokenStore, UserStorage};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

pub mod notification_service;
pub mod push;
pub mod subscription_service;

pub use notification_service::{DispatchResult, NotificationService, NOTIFICATION_TITLE};
pub use subscription_service::SubscriptionService;

/// Dependency-injection container built once at startup and shared by
/// every request handler and background task.
#[derive(Clone)]
pub struct ServiceContainer {
    pub mosque_storage: MosqueStorage,
    pub user_storage: UserStorage,
    pub token_storage: Arc<dyn TokenStore>,
    pub auth_service: AuthService,
    pub subscription_service: SubscriptionService,
    pub notification_service: NotificationService,
    pub config: Config,
}

impl ServiceContainer {
    pub fn new(pool: &Arc<PgPool>, config: Config) -> Self {
        let mosque_storage = MosqueStorage::new(pool);
        let user_storage = UserStorage::new(pool);
        let token_storage: Arc<dyn TokenStore> = Arc::new(PgTokenStorage::new(pool));

        let gateway: Arc<dyn PushTransport> = Arc::new(ExpoPushGateway::new(
            config.push.gateway_url.clone(),
            config.push.access_token.clone(),
            Duration::from_secs(config.push.gateway_timeout_secs),
        ));

        let subscription_service = SubscriptionService::new(
            token_storage.clone(),
            Arc::new(mosque_storage.clone()),
            Arc::new(user_storage.clone()),
        );

        let notification_service = NotificationService::new(
            token_storage.clone(),
            gateway,
            DispatchSettings::from(&config.push),
        );

        let auth_service = AuthService::new(&config.auth.jwt_secret);

        Self {
            mosque_storage,
            user_storage,
            token_storage,
            auth_service,
            subscription_service,
            notification_service,
            config,
        }
    }
}
