use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::common::config::Config;
use crate::services::ServiceContainer;
use crate::storage;
use crate::tasks::ScheduledTasks;
use crate::web::routes::create_router;
use crate::web::AppState;

const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(1800);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

pub struct MinaretServer {
    app_state: AppState,
    router: Router,
    address: SocketAddr,
    scheduled_tasks: Arc<ScheduledTasks>,
}

impl MinaretServer {
    pub async fn new(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        let pool_options = PgPoolOptions::new()
            .max_connections(config.database.max_size)
            .min_connections(config.database.min_idle.unwrap_or(5))
            .acquire_timeout(Duration::from_secs(config.database.connection_timeout))
            .max_lifetime(DEFAULT_MAX_LIFETIME)
            .idle_timeout(DEFAULT_IDLE_TIMEOUT);

        info!("Connecting to database...");
        let pool = Arc::new(pool_options.connect(&config.database_url()).await?);

        storage::initialize_schema(&pool).await?;

        let services = ServiceContainer::new(&pool, config.clone());
        let scheduled_tasks = Arc::new(ScheduledTasks::new(
            services.token_storage.clone(),
            &config.push,
        ));
        let app_state = AppState::new(services);

        let address =
            format!("{}:{}", config.server.host, config.server.port).parse::<SocketAddr>()?;

        let router = create_router(app_state.clone())
            .layer({
                let mut layer = CorsLayer::new()
                    .allow_methods(Any)
                    .allow_headers(Any);

                if config.cors.allowed_origins.iter().any(|o| o == "*") {
                    layer = layer.allow_origin(Any);
                } else {
                    let origins: Vec<http::HeaderValue> = config
                        .cors
                        .allowed_origins
                        .iter()
                        .filter_map(|o| http::HeaderValue::from_str(o).ok())
                        .collect();
                    if !origins.is_empty() {
                        layer = layer.allow_origin(origins);
                    } else {
                        layer = layer.allow_origin(Any);
                    }
                }
                layer
            })
            .layer(TraceLayer::new_for_http());

        Ok(Self {
            app_state,
            router,
            address,
            scheduled_tasks,
        })
    }

    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Listening on: {}", self.address);
        info!(
            "Push gateway: {}",
            self.app_state.services.config.push.gateway_url
        );

        self.scheduled_tasks.start_all().await;

        let listener = tokio::net::TcpListener::bind(self.address).await?;
        axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(async {
                shutdown_signal().await;
            })
            .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
    }
    info!("Shutting down server...");
}
