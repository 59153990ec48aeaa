use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use tubefetch::catalog::Catalog;
use tubefetch::config::ServerConfig;
use tubefetch::downloader::engine::{MediaEngine, YtDlpEngine};
use tubefetch::downloader::orchestrator::Orchestrator;
use tubefetch::registry::JobRegistry;
use tubefetch::server::{self, AppState};
use tubefetch::strategy::StrategyResolver;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();
    config.prepare_scratch()?;

    let engine: Arc<dyn MediaEngine> = Arc::new(YtDlpEngine::from_env());
    let resolver = Arc::new(StrategyResolver::new(
        config.strategy,
        config.cookies_path.clone(),
    ));
    let registry = Arc::new(JobRegistry::new());
    let catalog = Arc::new(Catalog::new(Arc::clone(&engine), Arc::clone(&resolver)));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&engine),
        Arc::clone(&resolver),
        Arc::clone(&registry),
        config.scratch_dir.clone(),
    ));

    let app = server::router(AppState {
        registry,
        catalog,
        orchestrator,
    });

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        %addr,
        strategy = ?config.strategy,
        engine = engine.name(),
        "tubefetch listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    // Failing to install the handler only affects graceful shutdown; the
    // process still terminates when Ctrl+C fires.
    if let Err(err) = tokio::signal::ctrl_c().await {
        eprintln!("Failed to install Ctrl+C handler: {}", err);
    }
}
