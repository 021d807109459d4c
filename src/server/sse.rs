//! Per-workflow SSE endpoint.
//!
//! Each event is framed as `event: <type>` + `data: <json>`; the connection
//! closes after a terminal event. Consumer disconnects never affect workflow
//! status — the subscription is just dropped.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use serde::Deserialize;
use streams::StreamSubscription;
use uuid::Uuid;

use crate::{server::check_auth, AppState};

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Replay from this sequence number when still retained.
    pub from_seq: Option<u64>,
}

pub async fn workflow_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    check_auth(&state, &headers).map_err(|status| (status, "unauthorized".to_string()))?;

    let subscription = state
        .bus
        .subscribe(id, query.from_seq)
        .map_err(|err| (StatusCode::NOT_FOUND, err.to_string()))?;

    Ok(Sse::new(event_stream(subscription)).keep_alive(KeepAlive::default()))
}

/// Drive a bus subscription until end-of-stream or a terminal event.
fn event_stream(
    subscription: StreamSubscription,
) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::unfold(Some(subscription), |state| async move {
        let mut subscription = state?;
        let event = subscription.next().await?;
        let frame = Event::default()
            .event(event.event_type.as_str())
            .data(serde_json::to_string(event.as_ref()).unwrap_or_else(|_| "{}".to_string()));
        let next_state = if event.event_type.is_terminal() {
            None
        } else {
            Some(subscription)
        };
        Some((Ok(frame), next_state))
    })
}
