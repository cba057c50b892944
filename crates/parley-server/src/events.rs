//! Newline-delimited JSON event stream for the caller's own channel.

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::stream;
use parley_core::events::EventType;
use parley_core::ApiError;
use parley_store::Subscription;
use tracing::debug;

use crate::error::ApiResult;
use crate::identity::Identity;
use crate::state::AppState;

pub const NDJSON: &str = "application/x-ndjson";

pub fn events_router() -> Router<AppState> {
    Router::new().route("/events/{event_type}", get(stream_events))
}

/// Each published record is one line. The stream ends on the stop sentinel;
/// a disconnecting client drops the subscription.
fn ndjson_body(subscription: Subscription) -> Body {
    let lines = stream::unfold(subscription, |mut sub| async move {
        let message = sub.next_message().await?;
        Some((Ok::<_, Infallible>(format!("{}\n", message.payload)), sub))
    });
    Body::from_stream(lines)
}

async fn stream_events(
    State(state): State<AppState>,
    Identity(owner): Identity,
    Path(event_type): Path<String>,
) -> ApiResult<Response> {
    let event_type: EventType = event_type.parse().map_err(ApiError::invalid_request)?;
    let channel = event_type.channel(&owner);
    debug!(channel, "event stream opened");
    let subscription = state.events.subscribe(&[channel]);
    Ok(([(header::CONTENT_TYPE, NDJSON)], ndjson_body(subscription)).into_response())
}
