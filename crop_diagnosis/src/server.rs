use crate::{
    config::ServerConfig, model_service::ModelService, recommendation::RecommendationService,
    report::ReportRenderer, routes::api_routes, telemetry::Metrics,
};
use axum::{extract::DefaultBodyLimit, http::Method, Router};
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Services built once at startup and shared read-only by every request.
#[derive(Clone)]
pub struct SharedState {
    pub model_service: Arc<dyn ModelService>,
    pub recommendation_service: Arc<RecommendationService>,
    pub report_renderer: Arc<ReportRenderer>,
    pub metrics: Arc<Metrics>,
}

pub fn build_router(state: SharedState, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .merge(api_routes())
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(state: SharedState, config: &ServerConfig) -> anyhow::Result<Self> {
        let metrics_layer = HttpMetricsLayerBuilder::new().build();
        let router = build_router(state, config.max_upload_bytes).layer(metrics_layer);

        let listener = TcpListener::bind(config.get_address()).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        mut shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                })
                .await?;
            Ok::<(), anyhow::Error>(())
        });

        Ok(server_handle)
    }
}
