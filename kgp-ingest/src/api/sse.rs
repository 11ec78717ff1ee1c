//! Server-Sent Events for live job progress and content activity

use std::convert::Infallible;

use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    /// Only forward events for this migration job
    #[serde(default)]
    pub job_id: Option<Uuid>,
}

/// GET /events[?job_id=]
///
/// Streams every `KgpEvent`, or only one job's lifecycle events when
/// `job_id` is given.
pub async fn event_stream(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let job_filter = query.job_id;
    kgp_common::sse::create_event_sse_stream("kgp-ingest", &state.event_bus, move |event| {
        match job_filter {
            Some(job_id) => event.job_id() == Some(job_id),
            None => true,
        }
    })
}
