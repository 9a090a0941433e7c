use std::sync::Arc;

use anyhow::{Context, Result};
use peoplebus::{
    AppConfig, AppState, Dispatcher, Gateway, ResourceManager, build_router, person_handlers,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::from_env().context("failed to load application configuration")?;

    let manager = Arc::new(
        ResourceManager::open_in_memory(config.pool_config())
            .context("failed to open the resource manager")?,
    );

    let registry = person_handlers(Arc::clone(&manager)).context("failed to register handlers")?;
    let (dispatcher, channels) = Dispatcher::start(registry, config.dispatcher_config())
        .context("failed to start the dispatcher")?;

    let gateway = Gateway::new(channels, config.reply_timeout);
    let app = build_router(AppState::new(Arc::new(gateway)));

    let addr = config.address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(
        address = %addr,
        workers = config.worker_count,
        reply_timeout_ms = config.reply_timeout.as_millis() as u64,
        "peoplebus started"
    );

    // The router owns the only gateway; once serving stops the dispatch queue
    // closes and the workers drain out.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("http server stopped, waiting for workers");
    tokio::task::spawn_blocking(move || dispatcher.join())
        .await
        .context("dispatcher join failed")?;

    info!(stats = %manager.stats(), "closing resource manager");
    manager.close();

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("peoplebus=debug,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install Ctrl+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
