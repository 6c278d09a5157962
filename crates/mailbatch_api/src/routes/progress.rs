//! Live progress over Server-Sent Events
//!
//! Each progress event is one SSE `data:` line holding the JSON event. The
//! stream ends after the terminal event.

use crate::{api_handler::ApiError, AppState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{stream, Stream};
use mailbatch_core::{ProgressBroadcaster, Subscription};
use std::{convert::Infallible, sync::Arc};
use tracing::{info, instrument, warn};

/// Releases the session entry when the client goes away
struct SubscriptionGuard {
    broadcaster: Arc<dyn ProgressBroadcaster>,
    subscription: Subscription,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.broadcaster
            .release(self.subscription.session_id(), self.subscription.token());
    }
}

/// GET /v1/progress/:session_id
#[instrument(skip(state))]
pub async fn subscribe_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let subscription = state.broadcaster.register(&session_id)?;
    info!("Progress stream opened");

    let guard = SubscriptionGuard {
        broadcaster: Arc::clone(&state.broadcaster),
        subscription,
    };

    let events = stream::unfold(guard, |mut guard| async move {
        let event = guard.subscription.recv().await?;
        let frame = Event::default().json_data(&event).unwrap_or_else(|e| {
            warn!("Failed to encode progress event: {}", e);
            Event::default().comment("unencodable event")
        });
        Some((Ok(frame), guard))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// DELETE /v1/progress/:session_id
#[instrument(skip(state))]
pub async fn close_handler(State(state): State<Arc<AppState>>, Path(session_id): Path<String>) -> StatusCode {
    state.broadcaster.close(&session_id);
    StatusCode::NO_CONTENT
}
