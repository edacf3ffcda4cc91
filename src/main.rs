use minaret::common::config::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::builder()
        .parse(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,minaret=debug,tower_http=debug".to_string()),
        )
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .init();

    tracing::info!("Loading configuration...");
    let config = Config::load()?;

    tracing::info!("Starting Minaret backend...");
    tracing::info!(
        "Listening on: {}:{}",
        config.server.host,
        config.server.port
    );

    let server = minaret::MinaretServer::new(config).await?;

    server.run().await?;

    Ok(())
}
