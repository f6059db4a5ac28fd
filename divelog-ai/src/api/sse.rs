//! Server-Sent Events for batch progress and record storage

use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
};
use divelog_common::events::DiveLogEvent;
use divelog_common::sse::event_bus_sse_stream;
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use uuid::Uuid;

use crate::AppState;

const SERVICE_NAME: &str = "divelog-ai";

/// GET /batch/events query
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEventsQuery {
    /// Only forward events of this batch
    pub batch_id: Option<Uuid>,
}

/// GET /batch/events - batch lifecycle and progress events
///
/// Streams BatchStarted, BatchProgress, BatchItemFinished and the terminal
/// BatchCompleted / BatchCancelled / BatchFailed events.
pub async fn batch_event_stream(
    State(state): State<AppState>,
    Query(query): Query<BatchEventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let wanted = query.batch_id;
    event_bus_sse_stream(SERVICE_NAME, &state.event_bus, move |event: &DiveLogEvent| {
        match (event.batch_id(), wanted) {
            (Some(id), Some(wanted)) => id == wanted,
            (Some(_), None) => true,
            (None, _) => false,
        }
    })
}

/// GET /events - every event of the service
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    event_bus_sse_stream(SERVICE_NAME, &state.event_bus, |_: &DiveLogEvent| true)
}
