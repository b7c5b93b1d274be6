/**
 * Canvas Collab Server Entry Point
 *
 * Loads configuration (defaults, optional TOML file, environment), sets up
 * tracing and serves the Axum application.
 */

use canvas_collab::backend::server::create_app;
use canvas_collab::shared::AppConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenv::dotenv().ok();

    // Initialize tracing, INFO by default
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .init();

    tracing::info!("[STARTUP] Server initialization started");

    let config = AppConfig::load()?;
    let addr = format!("{}:{}", config.bind_addr, config.port);

    // Create the Axum app
    let app = create_app(config).await?;

    // Run the server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("[STARTUP] Listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
