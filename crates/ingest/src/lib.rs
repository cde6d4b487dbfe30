pub mod otlp;
pub mod pipeline;
pub mod server;

pub use otlp::SessionTagging;
pub use pipeline::{Pipeline, PipelineConfig};
pub use server::run_ingest_servers;
