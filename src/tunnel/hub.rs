// ABOUTME: Server side of the request tunnel: one bound client socket and in-flight request correlation
// ABOUTME: Turns a fetch into a request frame and resolves it from response-init/chunk/response/error frames
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

//! # Tunnel Hub
//!
//! At most one tunnel client is bound at a time. `fetch` registers a pending
//! record keyed by a fresh correlation id, sends a `request` frame down the
//! bound socket, and waits for the client's answer. A `response-init` resolves
//! the fetch before any body arrives; the body then streams through a channel
//! fed by `response-chunk` frames and closed by `response`.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{decode_chunk, TunnelHeaders, TunnelMessage};
use crate::errors::{AppError, AppResult};

const TUNNEL_SERVICE: &str = "tunnel";

/// Body chunks of a tunnelled response
pub type TunnelBodyReceiver = mpsc::UnboundedReceiver<AppResult<Bytes>>;

/// An HTTP request to run on the tunnel client's side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRequest {
    /// HTTP method
    pub method: String,
    /// Absolute URL as reachable from the tunnel client
    pub url: String,
    /// Request headers
    pub headers: TunnelHeaders,
    /// Request body
    pub body: Option<String>,
}

impl TunnelRequest {
    /// GET request without a body
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_owned(),
            url: url.into(),
            headers: TunnelHeaders::new(),
            body: None,
        }
    }

    /// POST request with a JSON body
    #[must_use]
    pub fn post_json(url: impl Into<String>, body: String) -> Self {
        let mut headers = TunnelHeaders::new();
        headers.insert("content-type".to_owned(), "application/json".to_owned());
        Self {
            method: "POST".to_owned(),
            url: url.into(),
            headers,
            body: Some(body),
        }
    }
}

/// Response to a tunnelled request
///
/// Status and headers are available as soon as the client sent `response-init`;
/// the body keeps arriving afterwards.
#[derive(Debug)]
pub struct TunnelResponse {
    /// HTTP status
    pub status: u16,
    /// Response headers
    pub headers: TunnelHeaders,
    body: TunnelBodyReceiver,
}

impl TunnelResponse {
    fn complete(status: u16, headers: TunnelHeaders, body: String) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        if !body.is_empty() {
            // Receiver is alive; the send cannot fail
            let _ = tx.send(Ok(Bytes::from(body)));
        }
        Self {
            status,
            headers,
            body: rx,
        }
    }

    /// Whether the status is 2xx
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Body as a stream of chunks
    #[must_use]
    pub fn into_stream(self) -> UnboundedReceiverStream<AppResult<Bytes>> {
        UnboundedReceiverStream::new(self.body)
    }

    /// Drain the body
    ///
    /// # Errors
    ///
    /// Returns the first error the body stream carried
    pub async fn bytes(mut self) -> AppResult<Vec<u8>> {
        let mut collected = Vec::new();
        while let Some(chunk) = self.body.recv().await {
            collected.extend_from_slice(&chunk?);
        }
        Ok(collected)
    }

    /// Drain the body as UTF-8 text (lossy)
    ///
    /// # Errors
    ///
    /// Returns the first error the body stream carried
    pub async fn text(self) -> AppResult<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

struct ActiveTunnel {
    connection_id: Uuid,
    outgoing: mpsc::UnboundedSender<String>,
}

struct PendingRequest {
    resolver: Option<oneshot::Sender<AppResult<TunnelResponse>>>,
    body: Option<mpsc::UnboundedSender<AppResult<Bytes>>>,
    connection_id: Uuid,
}

impl PendingRequest {
    /// Still waiting for `response-init` but nobody awaits the answer any more
    fn is_abandoned(&self) -> bool {
        self.resolver
            .as_ref()
            .is_some_and(oneshot::Sender::is_closed)
    }
}

/// Drops the pending record of a fetch that was cancelled before it resolved
struct PendingGuard<'a> {
    pending: &'a Mutex<HashMap<String, PendingRequest>>,
    id: String,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Contended lock: the next fetch sweeps abandoned records instead
        let Ok(mut pending) = self.pending.try_lock() else {
            return;
        };
        if pending
            .get(&self.id)
            .is_some_and(|record| record.resolver.is_some())
        {
            pending.remove(&self.id);
            debug!(request_id = %self.id, "Abandoned tunnel request dropped");
        }
    }
}

/// Server-side tunnel endpoint shared by the tunnel route and tunnel-backed providers
#[derive(Default)]
pub struct TunnelHub {
    active: RwLock<Option<ActiveTunnel>>,
    pending: Mutex<HashMap<String, PendingRequest>>,
}

impl TunnelHub {
    /// Create a hub with no client bound
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a tunnel client is currently bound
    pub async fn is_connected(&self) -> bool {
        self.active.read().await.is_some()
    }

    /// Number of requests waiting for or streaming a response
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Bind a new tunnel connection, replacing any previous one
    ///
    /// Returns the receiver of outgoing frames; the socket task forwards them to
    /// the client. Dropping the previous binding's sender ends its forward loop.
    pub async fn attach(&self, connection_id: Uuid) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let previous = self.active.write().await.replace(ActiveTunnel {
            connection_id,
            outgoing: tx,
        });

        if let Some(previous) = previous {
            info!(
                previous = %previous.connection_id,
                current = %connection_id,
                "Tunnel connection replaced"
            );
        } else {
            info!(connection_id = %connection_id, "Tunnel connected");
        }
        rx
    }

    /// Unbind a closed tunnel connection
    ///
    /// Clears the binding only if it still points at this connection, and fails
    /// every request that was dispatched over it and has not finished.
    pub async fn detach(&self, connection_id: Uuid) {
        {
            let mut active = self.active.write().await;
            if active
                .as_ref()
                .is_some_and(|tunnel| tunnel.connection_id == connection_id)
            {
                *active = None;
                info!(connection_id = %connection_id, "Tunnel disconnected");
            }
        }

        let orphaned: Vec<PendingRequest> = {
            let mut pending = self.pending.lock().await;
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, record)| record.connection_id == connection_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };

        if !orphaned.is_empty() {
            warn!(
                connection_id = %connection_id,
                count = orphaned.len(),
                "Failing tunnel requests left in flight"
            );
        }
        for record in orphaned {
            Self::fail(record, || {
                AppError::external_unavailable(TUNNEL_SERVICE, "tunnel disconnected")
            });
        }
    }

    /// Run an HTTP request through the bound tunnel client
    ///
    /// Resolves once the client reported status and headers (or a complete
    /// response); the body may still be streaming.
    ///
    /// # Errors
    ///
    /// Returns `ResourceUnavailable` when no tunnel is bound, and an external
    /// service error when the client reports a failure or disconnects.
    pub async fn fetch(&self, request: TunnelRequest) -> AppResult<TunnelResponse> {
        let id = Uuid::new_v4().to_string();
        let (resolver, resolved) = oneshot::channel();

        let mut guard = {
            let active = self.active.read().await;
            let tunnel = active
                .as_ref()
                .ok_or_else(|| AppError::unavailable("tunnel not connected"))?;

            let frame = serde_json::to_string(&TunnelMessage::Request {
                id: id.clone(),
                method: request.method,
                url: request.url,
                headers: request.headers,
                body: request.body,
            })?;

            {
                let mut pending = self.pending.lock().await;
                // Callers that gave up while a guard could not take the lock
                pending.retain(|_, record| !record.is_abandoned());
                pending.insert(
                    id.clone(),
                    PendingRequest {
                        resolver: Some(resolver),
                        body: None,
                        connection_id: tunnel.connection_id,
                    },
                );
            }
            let guard = PendingGuard {
                pending: &self.pending,
                id: id.clone(),
                armed: true,
            };

            if tunnel.outgoing.send(frame).is_err() {
                return Err(AppError::unavailable("tunnel not connected"));
            }
            debug!(request_id = %id, "Tunnel request dispatched");
            guard
        };

        let outcome = resolved.await;
        guard.armed = false;
        outcome.unwrap_or_else(|_| {
            Err(AppError::external_unavailable(
                TUNNEL_SERVICE,
                "tunnel disconnected",
            ))
        })
    }

    /// Handle one text frame received from a tunnel client
    pub async fn handle_incoming(&self, text: &str) {
        let message = match serde_json::from_str::<TunnelMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed tunnel frame");
                return;
            }
        };

        match message {
            TunnelMessage::ResponseInit {
                id,
                headers,
                status_code,
            } => self.on_response_init(&id, status_code, headers).await,
            TunnelMessage::ResponseChunk { id, chunk } => self.on_chunk(&id, &chunk).await,
            TunnelMessage::Response {
                id,
                body,
                headers,
                status_code,
            } => self.on_response(&id, status_code, headers, body).await,
            TunnelMessage::Error { id, error } => self.on_error(&id, error).await,
            TunnelMessage::Request { id, .. } => {
                debug!(request_id = %id, "Ignoring request frame sent by a tunnel client");
            }
            TunnelMessage::Unknown => debug!("Ignoring tunnel frame with unknown type"),
        }
    }

    async fn on_response_init(&self, id: &str, status: u16, headers: TunnelHeaders) {
        let mut pending = self.pending.lock().await;
        let Some(record) = pending.get_mut(id) else {
            debug!(request_id = %id, "response-init for unknown tunnel request");
            return;
        };
        let Some(resolver) = record.resolver.take() else {
            debug!(request_id = %id, "Duplicate response-init ignored");
            return;
        };

        let (tx, rx) = mpsc::unbounded_channel();
        record.body = Some(tx);
        let response = TunnelResponse {
            status,
            headers,
            body: rx,
        };
        if resolver.send(Ok(response)).is_err() {
            // Caller gave up; nobody will read the body
            pending.remove(id);
        }
    }

    async fn on_chunk(&self, id: &str, chunk: &str) {
        let mut pending = self.pending.lock().await;
        let Some(body) = pending.get(id).and_then(|record| record.body.as_ref()) else {
            debug!(request_id = %id, "response-chunk for unknown or unopened tunnel request");
            return;
        };

        let delivered = match decode_chunk(chunk) {
            Ok(bytes) => body.send(Ok(Bytes::from(bytes))).is_ok(),
            Err(e) => {
                let _ = body.send(Err(AppError::external_service(
                    TUNNEL_SERVICE,
                    format!("invalid body chunk: {e}"),
                )));
                false
            }
        };

        if !delivered {
            pending.remove(id);
        }
    }

    async fn on_response(&self, id: &str, status: u16, headers: TunnelHeaders, body: String) {
        let Some(mut record) = self.pending.lock().await.remove(id) else {
            debug!(request_id = %id, "response for unknown tunnel request");
            return;
        };

        // An open body stream closes when its sender drops here
        if record.body.take().is_some() {
            return;
        }
        if let Some(resolver) = record.resolver.take() {
            let _ = resolver.send(Ok(TunnelResponse::complete(status, headers, body)));
        }
    }

    async fn on_error(&self, id: &str, error: String) {
        let Some(record) = self.pending.lock().await.remove(id) else {
            debug!(request_id = %id, "error for unknown tunnel request");
            return;
        };
        Self::fail(record, || AppError::external_service(TUNNEL_SERVICE, error.clone()));
    }

    fn fail(record: PendingRequest, error: impl Fn() -> AppError) {
        if let Some(body) = record.body {
            let _ = body.send(Err(error()));
        } else if let Some(resolver) = record.resolver {
            let _ = resolver.send(Err(error()));
        }
    }
}
