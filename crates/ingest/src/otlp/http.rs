use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::routing::post;
use axum::{Router, body::Bytes};
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use prost::Message;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Level;

use crate::otlp::SessionTagging;
use crate::otlp::decode::decode_request;
use crate::pipeline::Pipeline;

const PROTOBUF: &str = "application/x-protobuf";

#[derive(Clone)]
pub struct HttpIngestState {
    pub pipeline: Pipeline,
    pub tagging: SessionTagging,
}

pub fn router(pipeline: Pipeline, tagging: SessionTagging) -> Router {
    let state = HttpIngestState { pipeline, tagging };
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers(Any);
    Router::new()
        .route("/v1/traces", post(export_traces))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .on_request(tower_http::trace::DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(tower_http::trace::DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .with_state(state)
}

async fn export_traces(
    State(state): State<HttpIngestState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, [(&'static str, &'static str); 1], Vec<u8>) {
    let Ok(req) = ExportTraceServiceRequest::decode(body) else {
        tracing::warn!("otlp http traces decode failed");
        return (StatusCode::BAD_REQUEST, [("content-type", PROTOBUF)], Vec::new());
    };

    let header_token = headers
        .get(state.tagging.header.as_str())
        .and_then(|v| v.to_str().ok());
    let mut spans = decode_request(req);
    state.tagging.apply(&mut spans, header_token);

    tracing::debug!(count = spans.len(), "otlp http traces accepted");
    state.pipeline.submit_spans(spans).await;
    (
        StatusCode::OK,
        [("content-type", PROTOBUF)],
        ExportTraceServiceResponse::default().encode_to_vec(),
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use otelmap_core::filter::TimeWindow;
    use otelmap_store::Store;
    use prost::Message;
    use testkit::sample_export_request;

    use super::*;
    use crate::pipeline::PipelineConfig;

    async fn serve(store: &Store) -> String {
        let pipeline = Pipeline::new(
            store.clone(),
            PipelineConfig {
                channel_capacity: 8,
                flush_interval: Duration::from_millis(10),
                batch_size: 64,
            },
        );
        let app = router(pipeline, SessionTagging::default());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}/v1/traces")
    }

    #[tokio::test]
    async fn header_token_lands_in_session() {
        let store = Store::open_in_memory().unwrap();
        let url = serve(&store).await;

        let resp = reqwest::Client::new()
            .post(url)
            .header("x-otel-session", "hdr-token")
            .body(sample_export_request(None).encode_to_vec())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        tokio::time::sleep(Duration::from_millis(80)).await;
        let spans = store
            .fetch_session_spans("hdr-token", &TimeWindow::all())
            .unwrap();
        assert_eq!(spans.len(), 2);
    }

    #[tokio::test]
    async fn garbage_body_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let url = serve(&store).await;

        let resp = reqwest::Client::new()
            .post(url)
            .body(vec![0xff, 0xff, 0xff])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    }
}
