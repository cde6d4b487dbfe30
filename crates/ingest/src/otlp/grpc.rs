use std::sync::Arc;

use opentelemetry_proto::tonic::collector::trace::v1::trace_service_server::{
    TraceService, TraceServiceServer,
};
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use tonic::{Request, Response, Status};

use crate::otlp::SessionTagging;
use crate::otlp::decode::decode_request;
use crate::pipeline::Pipeline;

#[derive(Clone)]
pub struct GrpcIngest {
    pipeline: Arc<Pipeline>,
    tagging: Arc<SessionTagging>,
}

impl GrpcIngest {
    pub fn new(pipeline: Pipeline, tagging: SessionTagging) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            tagging: Arc::new(tagging),
        }
    }

    pub fn traces_service(&self) -> TraceServiceServer<Self> {
        TraceServiceServer::new(self.clone())
    }
}

#[tonic::async_trait]
impl TraceService for GrpcIngest {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> std::result::Result<Response<ExportTraceServiceResponse>, Status> {
        let header_token = request
            .metadata()
            .get(self.tagging.header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut spans = decode_request(request.into_inner());
        self.tagging.apply(&mut spans, header_token.as_deref());
        tracing::debug!(count = spans.len(), "otlp grpc traces accepted");
        self.pipeline.submit_spans(spans).await;
        Ok(Response::new(ExportTraceServiceResponse::default()))
    }
}
