use std::time::Duration;

use otelmap_core::model::span::SpanRecord;
use otelmap_store::Store;
use tokio::sync::mpsc;
use tracing::warn;

/// Bounded hand-off from ingest handlers to a single span writer task.
#[derive(Clone)]
pub struct Pipeline {
    spans_tx: mpsc::Sender<Vec<SpanRecord>>,
}

pub struct PipelineConfig {
    pub channel_capacity: usize,
    pub flush_interval: Duration,
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            flush_interval: Duration::from_millis(200),
            batch_size: 2048,
        }
    }
}

impl Pipeline {
    pub fn new(store: Store, cfg: PipelineConfig) -> Self {
        let (spans_tx, spans_rx) = mpsc::channel(cfg.channel_capacity);
        tokio::spawn(run_span_writer(
            store,
            spans_rx,
            cfg.batch_size,
            cfg.flush_interval,
        ));
        Self { spans_tx }
    }

    pub async fn submit_spans(&self, spans: Vec<SpanRecord>) {
        if spans.is_empty() {
            return;
        }
        if self.spans_tx.send(spans).await.is_err() {
            warn!("span pipeline dropped batch: receiver closed");
        }
    }
}

async fn run_span_writer(
    store: Store,
    mut rx: mpsc::Receiver<Vec<SpanRecord>>,
    batch_size: usize,
    flush_interval: Duration,
) {
    let mut ticker = tokio::time::interval(flush_interval);
    let mut buffer = Vec::new();
    loop {
        tokio::select! {
            batch = rx.recv() => match batch {
                Some(batch) => {
                    buffer.extend(batch);
                    if buffer.len() >= batch_size {
                        flush_spans(&store, &mut buffer);
                    }
                }
                None => {
                    if !buffer.is_empty() {
                        flush_spans(&store, &mut buffer);
                    }
                    break;
                }
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush_spans(&store, &mut buffer);
                }
            }
        }
    }
}

fn flush_spans(store: &Store, buffer: &mut Vec<SpanRecord>) {
    if let Err(e) = store.insert_spans(buffer) {
        warn!(error = ?e, count = buffer.len(), "failed to write span batch");
    } else {
        tracing::debug!(count = buffer.len(), "span batch written");
    }
    buffer.clear();
}
