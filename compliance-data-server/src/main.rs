use anyhow::{Context, Result};
use compliance_data_api::observability::{init_logging, init_metrics};
use compliance_data_api::{router, AppState, DataLayer, Settings};
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().context("Failed to load settings")?;

    init_logging(settings.log_config())
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;
    let metrics = init_metrics()?;

    info!("Starting compliance data server");

    let data_layer = Arc::new(
        DataLayer::initialize(settings.data_layer_config()?)
            .await
            .context("Data layer initialization failed")?,
    );

    let app = router(AppState::new(data_layer.clone(), Some(metrics)))
        .layer(TraceLayer::new_for_http());

    let addr = settings.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    data_layer.shutdown().await;
    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
