use crate::config::Config;
use crate::ort_service::OrtModelService;
use crate::recommendation::RecommendationService;
use crate::report::ReportRenderer;
use crate::server::{HttpServer, SharedState};
use crate::telemetry::Metrics;

use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let model_service = match OrtModelService::new(&config.model) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            tracing::error!("Failed to load classifier: {}", e);
            return Err(Box::new(e));
        }
    };

    let recommendation_service =
        Arc::new(RecommendationService::connect(&config.recommendation).await);
    tracing::info!(
        online = recommendation_service.is_online(),
        "Recommendation service ready"
    );
    let report_renderer = Arc::new(ReportRenderer::new(&config.report));
    let metrics = Arc::new(Metrics::new()?);

    let state = SharedState {
        model_service,
        recommendation_service,
        report_renderer,
        metrics,
    };

    let server = HttpServer::new(state, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    match server_handle.await {
        Ok(Err(e)) => tracing::error!("Server error: {}", e),
        Err(e) => tracing::error!("Server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
