use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, Sse};
use futures::Stream;
use otelmap_core::query::SessionEvent;
use otelmap_store::Store;
use serde::Deserialize;
use tokio::time::{Instant, MissedTickBehavior};

use crate::api::{ApiError, ApiState, known_session, with_store};

pub const TRACES_RECEIVED: &str = "traces_received";
pub const WAITING_TRACE: &str = "waiting_trace";

#[derive(Debug, Deserialize)]
pub struct SessionEventsQuery {
    #[serde(default)]
    pub token: String,
}

/// Tells a waiting client when the first spans of its session arrive.
///
/// The stream opens with a comment, reports `waiting_trace` on every poll until
/// spans exist, sends `traces_received` once, then only keepalive comments until
/// the configured lifetime runs out.
pub async fn session_events(
    State(state): State<ApiState>,
    Query(query): Query<SessionEventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    if query.token.trim().is_empty() {
        return Err(ApiError::BadRequest("missing token query parameter".into()));
    }
    let token = known_session(&state.store, &query.token).await?.to_string();
    let store = state.store.clone();
    let poll = state.config.session_events_poll.max(Duration::from_millis(10));
    let lifetime = state.config.session_events_timeout;

    let stream = async_stream::stream! {
        yield Ok(Event::default().comment("open"));

        let deadline = Instant::now() + lifetime;
        let mut received = false;
        if let Ok(true) = has_spans(&store, &token).await {
            yield status_event(TRACES_RECEIVED, "received");
            received = true;
        }

        let mut ticker = tokio::time::interval_at(Instant::now() + poll, poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                _ = ticker.tick() => {}
            }

            if received {
                yield Ok(Event::default().comment("keepalive"));
                continue;
            }
            match has_spans(&store, &token).await {
                Ok(true) => {
                    yield status_event(TRACES_RECEIVED, "received");
                    received = true;
                }
                Ok(false) => {
                    yield status_event(WAITING_TRACE, "waiting");
                }
                Err(err) => {
                    tracing::warn!(error = ?err, %token, "session events poll failed");
                    break;
                }
            }
        }
        tracing::debug!(%token, received, "session events stream closed");
    };

    Ok(Sse::new(stream))
}

async fn has_spans(store: &Store, token: &str) -> Result<bool, ApiError> {
    let token = token.to_string();
    with_store(store, move |s| s.count_session_spans(&token))
        .await
        .map(|count| count > 0)
}

fn status_event(name: &str, status: &str) -> Result<Event, axum::Error> {
    Event::default().event(name).json_data(SessionEvent {
        status: status.to_string(),
        message: None,
    })
}
