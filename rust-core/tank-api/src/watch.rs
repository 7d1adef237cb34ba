// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Watch endpoint.
//
// The response body is a sequence of JSON events written back to back, one
// per chunk, and always ends with the Break event. Clients decode it with a
// streaming JSON reader; there is no framing beyond the JSON itself.

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use futures::{stream, Stream};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use tank_condition::{parse_selector, Condition};
use tank_core::{Event, WatchRequest};
use tank_store::WatchOption;

use crate::error::ApiError;
use crate::AppState;

/// `POST {prefix}/watch/{resource}`
#[instrument(skip(state, request))]
pub(crate) async fn watch_handler(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Json(request): Json<WatchRequest>,
) -> Result<Response, ApiError> {
    let cond = match request.selector.as_deref().map(str::trim) {
        Some(selector) if !selector.is_empty() => parse_selector(selector)?,
        _ => Condition::truth(),
    };
    let opt = WatchOption::from_options(request.options, cond);
    info!(
        resource = %resource,
        self_only = opt.self_only,
        max_events = opt.max_events,
        timeout = ?opt.timeout,
        "Watch opened"
    );

    let events = state.store.watch(&resource, opt).await?;
    let body = Body::from_stream(event_stream(resource, events));
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

/// Encoded events from `rx`, ending after the first Break. A channel that
/// closes without one gets a Break appended.
pub(crate) fn event_stream(
    resource: String,
    rx: mpsc::Receiver<Event>,
) -> impl Stream<Item = Result<Bytes, serde_json::Error>> {
    stream::unfold(Some(rx), move |rx| {
        let resource = resource.clone();
        async move {
            let mut rx = rx?;
            let event = rx.recv().await.unwrap_or_else(Event::brk);
            let next = if event.is_break() {
                debug!(resource = %resource, "Watch stream finished");
                None
            } else {
                Some(rx)
            };
            Some((serde_json::to_vec(&event).map(Bytes::from), next))
        }
    })
}
