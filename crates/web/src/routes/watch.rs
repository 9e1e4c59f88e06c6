//! Live status watch: `GET /api/watch/{owner}`
//!
//! Server-sent events, one JSON `Project` per event, for every update to a
//! project of `owner`. The stream ends when the client disconnects, the
//! broadcaster closes, or the server begins shutting down.

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt, future::Either};
use tracing::{debug, warn};

use crate::state::AppState;

/// GET /api/watch/{owner}
pub async fn watch_owner(
    Path(owner): Path<String>,
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(owner = %owner, "watcher attached");

    let updates = state
        .broadcaster
        .subscribe(Some(owner))
        .into_stream()
        .filter_map(|project| async move {
            match Event::default().event("project").json_data(&project) {
                Ok(event) => Some(Ok(event)),
                Err(e) => {
                    warn!(project = %project.storage_key(), error = %e, "failed to encode watch event");
                    None
                }
            }
        });

    let stream = match state.shutdown {
        Some(mut shutdown) => {
            Either::Left(updates.take_until(Box::pin(async move { shutdown.wait().await })))
        }
        None => Either::Right(updates),
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
