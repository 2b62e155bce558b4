//! HTTP endpoint for the loader.
//!
//! `/metrics` renders the Prometheus recorder. `/health` reports how far the
//! run has got, one `name: value` line per file counter.

use axum::{Extension, Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{MetricsError, PrometheusInitSnafu};
use crate::pipeline::RunProgress;

/// Install the Prometheus recorder and serve it, with `progress`, on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init(addr: SocketAddr, progress: Arc<RunProgress>) -> Result<(), MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context(PrometheusInitSnafu)?;

    tokio::spawn(serve(addr, router(handle, progress)));
    Ok(())
}

pub fn router(handle: PrometheusHandle, progress: Arc<RunProgress>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(Extension(handle))
        .layer(Extension(progress))
}

async fn serve(addr: SocketAddr, app: Router) {
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind metrics server to {}: {}", addr, e);
            return;
        }
    };
    info!("Metrics endpoint listening on http://{}/metrics", addr);

    if let Err(e) = axum::serve(listener, app).await {
        error!("Metrics server error: {}", e);
    }
}

async fn metrics_handler(Extension(handle): Extension<PrometheusHandle>) -> String {
    handle.render()
}

async fn health_handler(Extension(progress): Extension<Arc<RunProgress>>) -> String {
    progress.render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit;
    use crate::metrics::events::LinesRead;
    use crate::pipeline::RunStats;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn get_path(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_health_and_metrics_endpoints() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        ::metrics::with_local_recorder(&recorder, || emit!(LinesRead { count: 3 }));

        let progress = Arc::new(RunProgress::default());
        let stats = RunStats {
            files_found: 3,
            files_processed: 1,
            ..Default::default()
        };
        progress.update(&stats, 2);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(handle, progress.clone());
        tokio::spawn(async move { axum::serve(listener, app).await });

        let health = get_path(addr, "/health").await;
        assert!(health.starts_with("HTTP/1.1 200"));
        assert!(health.contains("status: loading\n"));
        assert!(health.contains("files_active: 2\n"));
        assert!(health.contains("files_processed: 1\n"));

        progress.finish();
        let health = get_path(addr, "/health").await;
        assert!(health.contains("status: finished\n"));

        let metrics = get_path(addr, "/metrics").await;
        assert!(metrics.starts_with("HTTP/1.1 200"));
        assert!(metrics.contains("memcload_lines_read_total 3"));
    }
}
