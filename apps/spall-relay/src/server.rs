use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    config::ServerConfig,
    ingest::IngestListener,
    relay::ws_handler,
    service::RelayService,
};

pub const VIEWER_PATH: &str = "/ws";

pub fn router(service: Arc<RelayService>, config: &ServerConfig) -> Router {
    let router = Router::new()
        .route(VIEWER_PATH, get(ws_handler))
        .route("/healthz", get(health_handler))
        .route("/debug/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(service);

    let router = match &config.assets_dir {
        Some(dir) if dir.is_dir() => {
            info!(assets_dir = %dir.display(), "serving frontend assets");
            router.fallback_service(ServeDir::new(dir))
        }
        Some(dir) => {
            warn!(assets_dir = %dir.display(), "assets directory not found; static serving disabled");
            router
        }
        None => router,
    };

    router.layer(TraceLayer::new_for_http())
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn stats_handler(State(service): State<Arc<RelayService>>) -> impl IntoResponse {
    Json(service.stats())
}

async fn metrics_handler(State(service): State<Arc<RelayService>>) -> impl IntoResponse {
    match service.render_metrics() {
        Some(body) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Both listeners, bound and ready to serve.
pub struct RelayServer {
    service: Arc<RelayService>,
    ingest: IngestListener,
    http: TcpListener,
    router: Router,
}

impl RelayServer {
    pub async fn bind(config: &ServerConfig, service: Arc<RelayService>) -> Result<Self> {
        let ingest = IngestListener::bind(config.ingest_addr)
            .await
            .context("failed to bind ingest listener")?;
        let http = TcpListener::bind(config.http_addr)
            .await
            .with_context(|| format!("failed to bind http listener on {}", config.http_addr))?;
        let router = router(Arc::clone(&service), config);

        Ok(Self {
            service,
            ingest,
            http,
            router,
        })
    }

    pub fn ingest_addr(&self) -> Result<SocketAddr> {
        self.ingest
            .local_addr()
            .context("ingest listener has no local address")
    }

    pub fn http_addr(&self) -> Result<SocketAddr> {
        self.http
            .local_addr()
            .context("http listener has no local address")
    }

    /// Runs the ingest loop and the HTTP server until `shutdown` resolves or
    /// either of them fails.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let RelayServer {
            service,
            ingest,
            http,
            router,
        } = self;

        if let Ok(addr) = http.local_addr() {
            info!(%addr, path = VIEWER_PATH, "spinning up viewer server");
        }

        let http_server = async move {
            axum::serve(http, router)
                .with_graceful_shutdown(shutdown)
                .await
        };

        tokio::select! {
            result = http_server => result.context("http server exited with error"),
            result = ingest.run(service) => result.context("ingest listener stopped"),
        }
    }
}
