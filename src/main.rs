use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use tokio::{signal, sync::watch};
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

use storefront_checkout as api;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const IDEMPOTENCY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);

    if cfg.webhook_secret().is_none() {
        warn!("webhook secret not configured; payment notifications are not signature-checked");
    }

    let cors = api::cors_layer(&cfg)?;
    let host = cfg.host.clone();
    let port = cfg.port;
    let state = api::AppState::from_config(cfg)?;
    info!(
        store = state.webhooks.store().backend(),
        environment = %state.config.environment,
        "services initialised"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let recovery = api::services::payment_recovery::start_worker(
        state.webhooks.clone(),
        state.config.recovery_interval(),
        shutdown_rx.clone(),
    );
    let sweeper = spawn_idempotency_sweeper(state.idempotency.clone(), shutdown_rx);

    let app = api::build_router(state)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(cors);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", host, port))?;
    info!("storefront-checkout listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = recovery.await;
    let _ = sweeper.await;
    info!("shutdown complete");

    Ok(())
}

fn spawn_idempotency_sweeper(
    store: api::middleware_helpers::IdempotencyStore,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(IDEMPOTENCY_SWEEP_INTERVAL) => store.cleanup(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
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
