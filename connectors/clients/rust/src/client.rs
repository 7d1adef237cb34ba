// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <j.d.a.jewell@open.ac.uk>

//! Remote watch client.
//!
//! [`WatchClient`] holds one long-lived streaming POST against a Tank watch
//! endpoint. A single worker task owns the HTTP response; [`WatchClient::next`]
//! sends it a pull request and waits for exactly one event in reply.
//!
//! When the stream ends without a Break the worker waits briefly, reconnects
//! over the URL list and carries on. If no URL answers, or streams keep
//! ending without delivering anything, the caller gets a Break. A Nop
//! from the server, a Break from the server, and [`WatchClient::close`] all
//! close the client for good.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tank_core::{Event, EventType, WatchRequest};

use crate::error::{Result, WatchClientError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Pause before each reconnect.
const RECONNECT_BACKOFF: Duration = Duration::from_millis(100);
/// Reconnects allowed in a row without receiving an event.
const MAX_IDLE_RECONNECTS: u32 = 5;

// ---------------------------------------------------------------------------
// ClientState
// ---------------------------------------------------------------------------

/// Connection state of a [`WatchClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Streaming,
    Reconnecting,
    Closed,
}

type SharedState = Arc<watch::Sender<ClientState>>;

fn set_state(state: &SharedState, next: ClientState) {
    state.send_if_modified(|current| {
        // Closed is terminal.
        if *current == next || *current == ClientState::Closed {
            return false;
        }
        debug!(from = ?*current, to = ?next, "Watch client state");
        *current = next;
        true
    });
}

fn is_closed(state: &SharedState) -> bool {
    *state.borrow() == ClientState::Closed
}

/// Resolves once the state reaches Closed.
async fn closed(state: &mut watch::Receiver<ClientState>) {
    let _ = state.wait_for(|s| *s == ClientState::Closed).await;
}

// ---------------------------------------------------------------------------
// WatchClient
// ---------------------------------------------------------------------------

/// A long-lived watch over one resource.
pub struct WatchClient {
    requests: mpsc::Sender<()>,
    responses: mpsc::Receiver<Event>,
    state: SharedState,
    worker: JoinHandle<()>,
}

/// Cloneable handle that closes a [`WatchClient`] from another task.
#[derive(Clone)]
pub struct WatchCloser {
    state: SharedState,
}

impl WatchCloser {
    pub fn close(&self) {
        set_state(&self.state, ClientState::Closed);
    }
}

impl WatchClient {
    /// Open a watch against the first URL in `urls` that accepts it.
    ///
    /// Each URL is a full watch endpoint, for example
    /// `http://host:8080/api/v1/watch/nodes`.
    ///
    /// # Errors
    ///
    /// [`WatchClientError::InvalidUrl`] if a URL does not parse, and
    /// [`WatchClientError::NoUrlAvailable`] if none answers with a 2xx.
    pub async fn connect(urls: &[&str], request: WatchRequest) -> Result<Self> {
        let urls = urls
            .iter()
            .map(|raw| {
                Url::parse(raw).map_err(|e| WatchClientError::InvalidUrl {
                    url: raw.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let body = serde_json::to_vec(&request)?;
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        let (state, _) = watch::channel(ClientState::Disconnected);
        let state = Arc::new(state);
        set_state(&state, ClientState::Connecting);
        let stream = match open_stream(&http, &urls, &body, &state).await {
            Ok(stream) => stream,
            Err(e) => {
                set_state(&state, ClientState::Closed);
                return Err(e);
            }
        };
        set_state(&state, ClientState::Streaming);

        let (request_tx, request_rx) = mpsc::channel(1);
        let (response_tx, response_rx) = mpsc::channel(1);
        let worker = Worker {
            http,
            urls,
            body,
            stream,
            buffer: Vec::new(),
            idle_reconnects: 0,
            state: state.clone(),
            requests: request_rx,
            responses: response_tx,
        };
        let worker = tokio::spawn(worker.run());

        Ok(Self {
            requests: request_tx,
            responses: response_rx,
            state,
            worker,
        })
    }

    /// The next event. Returns Break once the watch has ended, and on
    /// every call after that.
    pub async fn next(&mut self) -> Event {
        if is_closed(&self.state) {
            return Event::brk();
        }
        if self.requests.send(()).await.is_err() {
            return Event::brk();
        }
        self.responses.recv().await.unwrap_or_else(Event::brk)
    }

    /// Close the watch. A pending or later [`WatchClient::next`] returns
    /// Break and no reconnection is attempted.
    pub fn close(&self) {
        set_state(&self.state, ClientState::Closed);
    }

    pub fn closer(&self) -> WatchCloser {
        WatchCloser {
            state: self.state.clone(),
        }
    }

    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }
}

impl Drop for WatchClient {
    fn drop(&mut self) {
        set_state(&self.state, ClientState::Closed);
        self.worker.abort();
    }
}

/// POST the watch request to each URL in turn until one answers 2xx.
async fn open_stream(
    http: &reqwest::Client,
    urls: &[Url],
    body: &[u8],
    state: &SharedState,
) -> Result<reqwest::Response> {
    for url in urls {
        if is_closed(state) {
            return Err(WatchClientError::Closed);
        }
        let sent = http
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await;
        match sent {
            Ok(response) if response.status().is_success() => {
                info!(url = %url, "Watch stream open");
                return Ok(response);
            }
            Ok(response) => {
                warn!(url = %url, status = %response.status(), "Watch endpoint refused request");
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Watch endpoint unreachable");
            }
        }
    }
    Err(WatchClientError::NoUrlAvailable)
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct Worker {
    http: reqwest::Client,
    urls: Vec<Url>,
    body: Vec<u8>,
    stream: reqwest::Response,
    /// Bytes received but not yet decoded.
    buffer: Vec<u8>,
    /// Reconnects since the last decoded event.
    idle_reconnects: u32,
    state: SharedState,
    requests: mpsc::Receiver<()>,
    responses: mpsc::Sender<Event>,
}

impl Worker {
    async fn run(mut self) {
        let mut state = self.state.subscribe();
        loop {
            let request = tokio::select! {
                _ = closed(&mut state) => break,
                request = self.requests.recv() => request,
            };
            if request.is_none() {
                break;
            }
            let event = tokio::select! {
                _ = closed(&mut state) => break,
                event = self.next_event() => event,
            };
            let last = event.is_break();
            if self.responses.send(event).await.is_err() || last {
                break;
            }
        }
        set_state(&self.state, ClientState::Closed);
        debug!("Watch worker stopped");
    }

    async fn next_event(&mut self) -> Event {
        loop {
            match self.decode() {
                Ok(Some(event)) => {
                    self.idle_reconnects = 0;
                    match event.event_type {
                        EventType::Nop => {
                            info!("Server ended the watch");
                            set_state(&self.state, ClientState::Closed);
                            return Event::brk();
                        }
                        EventType::Break => {
                            set_state(&self.state, ClientState::Closed);
                            return event;
                        }
                        _ => return event,
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Undecodable watch stream; reconnecting");
                    if !self.reconnect().await {
                        return Event::brk();
                    }
                    continue;
                }
            }

            match self.stream.chunk().await {
                Ok(Some(bytes)) => self.buffer.extend_from_slice(&bytes),
                Ok(None) => {
                    warn!("Watch stream ended without a break; reconnecting");
                    if !self.reconnect().await {
                        return Event::brk();
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Watch stream failed; reconnecting");
                    if !self.reconnect().await {
                        return Event::brk();
                    }
                }
            }
        }
    }

    /// One complete event from the front of the buffer, if there is one.
    fn decode(&mut self) -> std::result::Result<Option<Event>, serde_json::Error> {
        let mut events = serde_json::Deserializer::from_slice(&self.buffer).into_iter::<Event>();
        match events.next() {
            Some(Ok(event)) => {
                let consumed = events.byte_offset();
                self.buffer.drain(..consumed);
                Ok(Some(event))
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(e),
            None => {
                // Only whitespace so far.
                self.buffer.clear();
                Ok(None)
            }
        }
    }

    async fn reconnect(&mut self) -> bool {
        if is_closed(&self.state) {
            return false;
        }
        self.idle_reconnects += 1;
        if self.idle_reconnects > MAX_IDLE_RECONNECTS {
            warn!(attempts = MAX_IDLE_RECONNECTS, "Watch streams keep ending empty; ending watch");
            set_state(&self.state, ClientState::Closed);
            return false;
        }
        set_state(&self.state, ClientState::Reconnecting);
        self.buffer.clear();
        tokio::time::sleep(RECONNECT_BACKOFF).await;
        match open_stream(&self.http, &self.urls, &self.body, &self.state).await {
            Ok(stream) => {
                self.stream = stream;
                set_state(&self.state, ClientState::Streaming);
                true
            }
            Err(e) => {
                warn!(error = %e, "Reconnect failed; ending watch");
                set_state(&self.state, ClientState::Closed);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::body::{Body, Bytes};
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use futures::stream::{self, StreamExt};
    use serde_json::json;
    use tank_core::WatchOptions;
    use tokio::net::TcpListener;

    type Script = fn(usize, WatchRequest) -> Response;

    #[derive(Clone)]
    struct Server {
        calls: Arc<AtomicUsize>,
        script: Script,
    }

    async fn handler(State(server): State<Server>, Json(request): Json<WatchRequest>) -> Response {
        let call = server.calls.fetch_add(1, Ordering::SeqCst);
        (server.script)(call, request)
    }

    /// Serve `script` on an ephemeral port; returns the watch URL and the
    /// call counter.
    async fn spawn_server(script: Script) -> (String, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/api/v1/watch/{resource}", post(handler))
            .with_state(Server {
                calls: calls.clone(),
                script,
            });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/api/v1/watch/nodes"), calls)
    }

    fn event(event_type: EventType, n: i64) -> Event {
        Event::new(event_type, json!({"n": n}).as_object().cloned().unwrap())
    }

    fn encode(events: &[Event]) -> Vec<std::result::Result<Bytes, std::io::Error>> {
        events
            .iter()
            .map(|e| Ok(Bytes::from(serde_json::to_vec(e).unwrap())))
            .collect()
    }

    /// A body that delivers `events` and then ends.
    fn finite(events: &[Event]) -> Response {
        Body::from_stream(stream::iter(encode(events))).into_response()
    }

    /// A body that delivers `events` and then stays open.
    fn open_ended(events: &[Event]) -> Response {
        Body::from_stream(stream::iter(encode(events)).chain(stream::pending())).into_response()
    }

    fn request() -> WatchRequest {
        WatchOptions::default().with_max_events(10).into()
    }

    #[tokio::test]
    async fn test_streams_until_break() {
        let (url, _) = spawn_server(|_, request| {
            assert_eq!(request.options.max_events, 10);
            finite(&[event(EventType::Add, 1), event(EventType::Change, 2), Event::brk()])
        })
        .await;
        let mut client = WatchClient::connect(&[url.as_str()], request()).await.unwrap();
        assert_eq!(client.state(), ClientState::Streaming);
        assert_eq!(client.next().await, event(EventType::Add, 1));
        assert_eq!(client.next().await, event(EventType::Change, 2));
        assert!(client.next().await.is_break());
        assert_eq!(client.state(), ClientState::Closed);
        assert!(client.next().await.is_break());
    }

    #[tokio::test]
    async fn test_single_chunk_with_many_events() {
        let (url, _) = spawn_server(|_, _| {
            let mut body = Vec::new();
            for e in [event(EventType::Add, 1), event(EventType::Delete, 2), Event::brk()] {
                body.extend(serde_json::to_vec(&e).unwrap());
            }
            Body::from(body).into_response()
        })
        .await;
        let mut client = WatchClient::connect(&[url.as_str()], request()).await.unwrap();
        assert_eq!(client.next().await.event_type, EventType::Add);
        assert_eq!(client.next().await.event_type, EventType::Delete);
        assert!(client.next().await.is_break());
    }

    #[tokio::test]
    async fn test_reconnects_after_unexpected_eof() {
        let (url, calls) = spawn_server(|call, _| match call {
            0 => finite(&[event(EventType::Add, 1)]),
            _ => finite(&[event(EventType::Change, 2), Event::brk()]),
        })
        .await;
        let mut client = WatchClient::connect(&[url.as_str()], request()).await.unwrap();
        assert_eq!(client.next().await, event(EventType::Add, 1));
        assert_eq!(client.next().await, event(EventType::Change, 2));
        assert!(client.next().await.is_break());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_reconnect_yields_break() {
        let (url, calls) = spawn_server(|call, _| match call {
            0 => finite(&[event(EventType::Add, 1)]),
            _ => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        })
        .await;
        let mut client = WatchClient::connect(&[url.as_str()], request()).await.unwrap();
        assert_eq!(client.next().await.event_type, EventType::Add);
        assert!(client.next().await.is_break());
        assert_eq!(client.state(), ClientState::Closed);
        assert!(client.next().await.is_break());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_streams_end_in_break() {
        let (url, calls) = spawn_server(|_, _| finite(&[])).await;
        let mut client = WatchClient::connect(&[url.as_str()], request()).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .unwrap();
        assert!(event.is_break());
        assert_eq!(client.state(), ClientState::Closed);
        assert_eq!(calls.load(Ordering::SeqCst), 1 + MAX_IDLE_RECONNECTS as usize);
    }

    #[tokio::test]
    async fn test_events_reset_reconnect_budget() {
        // Every stream delivers one event and then drops.
        let (url, calls) = spawn_server(|call, _| finite(&[event(EventType::Change, call as i64)])).await;
        let mut client = WatchClient::connect(&[url.as_str()], request()).await.unwrap();
        let rounds = MAX_IDLE_RECONNECTS as i64 + 3;
        for n in 0..rounds {
            assert_eq!(client.next().await, event(EventType::Change, n));
        }
        assert_eq!(client.state(), ClientState::Streaming);
        assert_eq!(calls.load(Ordering::SeqCst), rounds as usize);
        client.close();
    }

    #[tokio::test]
    async fn test_nop_closes_client() {
        let (url, _) = spawn_server(|_, _| open_ended(&[Event::nop(), event(EventType::Add, 1)])).await;
        let mut client = WatchClient::connect(&[url.as_str()], request()).await.unwrap();
        assert!(client.next().await.is_break());
        assert_eq!(client.state(), ClientState::Closed);
        assert!(client.next().await.is_break());
    }

    #[tokio::test]
    async fn test_fails_over_to_next_url() {
        let (bad, _) = spawn_server(|_, _| StatusCode::INTERNAL_SERVER_ERROR.into_response()).await;
        let (good, _) = spawn_server(|_, _| finite(&[Event::brk()])).await;
        let mut client = WatchClient::connect(&[bad.as_str(), good.as_str()], request())
            .await
            .unwrap();
        assert!(client.next().await.is_break());
    }

    #[tokio::test]
    async fn test_no_url_available() {
        let (bad, _) = spawn_server(|_, _| StatusCode::INTERNAL_SERVER_ERROR.into_response()).await;
        let err = WatchClient::connect(&[bad.as_str()], request()).await.err().unwrap();
        assert!(matches!(err, WatchClientError::NoUrlAvailable));

        let err = WatchClient::connect(&["not a url"], request()).await.err().unwrap();
        assert!(matches!(err, WatchClientError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn test_close_ends_pending_next() {
        let (url, calls) = spawn_server(|_, _| open_ended(&[event(EventType::Add, 1)])).await;
        let mut client = WatchClient::connect(&[url.as_str()], request()).await.unwrap();
        assert_eq!(client.next().await.event_type, EventType::Add);

        let closer = client.closer();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            closer.close();
        });
        let pending = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .unwrap();
        assert!(pending.is_break());
        assert_eq!(client.state(), ClientState::Closed);
        assert!(client.next().await.is_break());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
