use std::net::SocketAddr;

use otelmap_core::error::{OtelMapError, Result};
use tonic::transport::Server;

use crate::otlp::SessionTagging;
use crate::otlp::grpc::GrpcIngest;
use crate::otlp::http;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Serves OTLP/gRPC and OTLP/HTTP trace ingest until either server fails.
pub async fn run_ingest_servers(
    store: otelmap_store::Store,
    grpc_addr: SocketAddr,
    http_addr: SocketAddr,
    cfg: PipelineConfig,
    tagging: SessionTagging,
) -> Result<()> {
    let pipeline = Pipeline::new(store, cfg);
    let grpc = GrpcIngest::new(pipeline.clone(), tagging.clone());
    let http_router = http::router(pipeline, tagging);

    let grpc_task = tokio::spawn(async move {
        Server::builder()
            .add_service(grpc.traces_service())
            .serve(grpc_addr)
            .await
    });

    let http_task = tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(http_addr).await?;
        axum::serve(listener, http_router).await
    });

    tracing::info!(%grpc_addr, %http_addr, "otlp ingest listening");

    tokio::select! {
        res = grpc_task => {
            let inner = res.map_err(|e| OtelMapError::Ingest(format!("gRPC task join failed: {e}")))?;
            inner.map_err(|e| OtelMapError::Ingest(format!("gRPC server failed: {e}")))
        }
        res = http_task => {
            let inner = res.map_err(|e| OtelMapError::Ingest(format!("HTTP task join failed: {e}")))?;
            inner.map_err(|e| OtelMapError::Ingest(format!("HTTP server failed: {e}")))
        }
    }
}
