//! Server-Sent Events over the event bus

use crate::AppState;
use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use livedb_common::events::LiveDbEvent;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Only forward events of this model set (status events are always sent)
    pub model_set: Option<String>,
}

/// GET /events?model_set=
pub async fn event_stream(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.livedb.event_bus().subscribe();
    info!(
        model_set = ?query.model_set,
        subscribers = state.livedb.event_bus().subscriber_count(),
        "SSE client connected"
    );

    let filter = query.model_set;
    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        let filter = filter.clone();
        async move {
            match result {
                Ok(event) if wanted(&event, filter.as_deref()) => to_sse_event(&event).map(Ok),
                Ok(_) => None,
                Err(e) => {
                    warn!("SSE client lagged: {:?}", e);
                    None
                }
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn wanted(event: &LiveDbEvent, model_set: Option<&str>) -> bool {
    match (model_set, event.model_set_key()) {
        (None, _) => true,
        (Some(_), None) => true,
        (Some(wanted), Some(actual)) => wanted == actual,
    }
}

fn to_sse_event(event: &LiveDbEvent) -> Option<Event> {
    Event::default()
        .event(event.event_type())
        .json_data(event)
        .map_err(|e| warn!("Failed to serialize event: {}", e))
        .ok()
}
