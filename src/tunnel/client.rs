// ABOUTME: Client side of the request tunnel: executes relayed HTTP requests and keeps the socket alive
// ABOUTME: TunnelExecutor streams responses back as frames; QueuedSocket buffers frames across reconnects
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

//! # Tunnel Client
//!
//! Runs next to the local model server. Each `request` frame received from the
//! chat server is executed with a real HTTP client and answered with
//! `response-init`, one `response-chunk` per body read, and a final `response`
//! carrying the full text. Any failure is answered with `error`.

use std::collections::VecDeque;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::{TunnelHeaders, TunnelMessage};
use crate::constants::tunnel::RECONNECT_DELAY_MS;
use crate::errors::{AppError, AppResult};

/// Connection timeout for relayed requests
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// WebSocket stream type produced by [`SocketFactory`]
pub type TunnelSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Frames answering one relayed request, in send order
pub type TunnelFrameStream = Pin<Box<dyn Stream<Item = TunnelMessage> + Send>>;

/// Performs relayed HTTP requests on the tunnel client machine
#[derive(Clone)]
pub struct TunnelExecutor {
    client: Client,
    allowed_prefix: Option<String>,
}

impl TunnelExecutor {
    /// Create an executor
    ///
    /// When `allowed_prefix` is set, requests whose URL does not start with it
    /// are refused with an `error` frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created
    pub fn new(allowed_prefix: Option<String>) -> AppResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            allowed_prefix,
        })
    }

    /// Execute a `request` frame
    ///
    /// Frames other than `request` produce an empty stream.
    #[must_use]
    pub fn execute(&self, message: TunnelMessage) -> TunnelFrameStream {
        let TunnelMessage::Request {
            id,
            method,
            url,
            headers,
            body,
        } = message
        else {
            return Box::pin(futures_util::stream::empty());
        };

        let client = self.client.clone();
        let refusal = self
            .allowed_prefix
            .as_deref()
            .filter(|prefix| !url.starts_with(prefix))
            .map(|prefix| format!("URL not allowed: {url} is outside {prefix}"));

        Box::pin(async_stream::stream! {
            if let Some(refusal) = refusal {
                warn!(request_id = %id, "{refusal}");
                yield TunnelMessage::error(id, refusal);
                return;
            }

            let request = match build_request(&client, &method, &url, &headers, body) {
                Ok(request) => request,
                Err(e) => {
                    yield TunnelMessage::error(id, e.to_string());
                    return;
                }
            };

            debug!(request_id = %id, method = %method, url = %url, "Executing tunnelled request");
            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(request_id = %id, error = %e, "Tunnelled request failed");
                    yield TunnelMessage::error(id, e.to_string());
                    return;
                }
            };

            let status_code = response.status().as_u16();
            let response_headers = collect_headers(response.headers());
            yield TunnelMessage::ResponseInit {
                id: id.clone(),
                headers: response_headers.clone(),
                status_code,
            };

            let mut full = Vec::new();
            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => {
                        full.extend_from_slice(&bytes);
                        yield TunnelMessage::chunk(id.clone(), &bytes);
                    }
                    Err(e) => {
                        warn!(request_id = %id, error = %e, "Tunnelled response body failed");
                        yield TunnelMessage::error(id, e.to_string());
                        return;
                    }
                }
            }

            yield TunnelMessage::Response {
                id,
                body: String::from_utf8_lossy(&full).into_owned(),
                headers: response_headers,
                status_code,
            };
        })
    }
}

fn build_request(
    client: &Client,
    method: &str,
    url: &str,
    headers: &TunnelHeaders,
    body: Option<String>,
) -> AppResult<reqwest::RequestBuilder> {
    let method = Method::from_str(&method.to_uppercase())
        .map_err(|e| AppError::invalid_input(format!("Invalid method {method}: {e}")))?;

    let mut header_map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AppError::invalid_input(format!("Invalid header name {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| AppError::invalid_input(format!("Invalid header value: {e}")))?;
        header_map.insert(name, value);
    }

    let request = client.request(method, url).headers(header_map);
    Ok(match body {
        Some(body) => request.body(body),
        None => request,
    })
}

fn collect_headers(headers: &HeaderMap) -> TunnelHeaders {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_owned(), value.to_owned()))
        })
        .collect()
}

/// Opens tunnel sockets; called again for every reconnect
#[async_trait]
pub trait SocketFactory: Send + Sync + 'static {
    /// Open a new socket
    async fn connect(&self) -> AppResult<TunnelSocket>;
}

/// Connects to a fixed `ws://` or `wss://` URL
pub struct UrlSocketFactory {
    url: String,
}

impl UrlSocketFactory {
    /// Factory for the given URL
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl SocketFactory for UrlSocketFactory {
    async fn connect(&self) -> AppResult<TunnelSocket> {
        let (socket, _) = connect_async(self.url.as_str()).await.map_err(|e| {
            AppError::external_unavailable("tunnel", format!("connect to {}: {e}", self.url))
        })?;
        Ok(socket)
    }
}

/// Outbound-queuing socket that reconnects forever
///
/// Text sent while disconnected is buffered and flushed in order once a socket
/// is open again. Incoming text frames are delivered on the receiver returned by
/// [`QueuedSocket::spawn`].
pub struct QueuedSocket {
    outgoing: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl QueuedSocket {
    /// Start the connection loop
    pub fn spawn<F: SocketFactory>(
        factory: F,
        reconnect_delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(connection_loop(
            factory,
            reconnect_delay,
            outgoing_rx,
            incoming_tx,
        ));

        (
            Self {
                outgoing: outgoing_tx,
                task,
            },
            incoming_rx,
        )
    }

    /// Queue a text frame
    ///
    /// # Errors
    ///
    /// Returns an error once the connection loop has stopped
    pub fn send(&self, text: String) -> AppResult<()> {
        self.outgoing
            .send(text)
            .map_err(|_| AppError::internal("tunnel socket loop stopped"))
    }

    /// Serialize and queue a tunnel frame
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the loop has stopped
    pub fn send_message(&self, message: &TunnelMessage) -> AppResult<()> {
        self.send(serde_json::to_string(message)?)
    }

    /// Stop the connection loop
    pub fn close(&self) {
        self.task.abort();
    }
}

async fn connection_loop<F: SocketFactory>(
    factory: F,
    reconnect_delay: Duration,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    incoming: mpsc::UnboundedSender<String>,
) {
    // Frames taken off the channel but not yet written to a socket
    let mut unsent: VecDeque<String> = VecDeque::new();

    loop {
        match factory.connect().await {
            Ok(socket) => {
                info!("Tunnel socket connected");
                let outcome = pump(socket, &mut unsent, &mut outgoing, &incoming).await;
                match outcome {
                    PumpOutcome::Stopped => return,
                    PumpOutcome::Disconnected(reason) => {
                        warn!(reason = %reason, "Tunnel socket lost");
                    }
                }
            }
            Err(e) => warn!(error = %e, "Tunnel socket connect failed"),
        }

        debug!(
            delay_ms = reconnect_delay.as_millis(),
            queued = unsent.len(),
            "Reconnecting tunnel socket"
        );
        tokio::time::sleep(reconnect_delay).await;
    }
}

enum PumpOutcome {
    /// Every sender and the incoming receiver are gone
    Stopped,
    Disconnected(String),
}

async fn pump(
    socket: TunnelSocket,
    unsent: &mut VecDeque<String>,
    outgoing: &mut mpsc::UnboundedReceiver<String>,
    incoming: &mpsc::UnboundedSender<String>,
) -> PumpOutcome {
    let (mut sink, mut stream) = socket.split();

    while let Some(text) = unsent.pop_front() {
        if let Err(e) = sink.send(WsMessage::Text(text.clone())).await {
            unsent.push_front(text);
            return PumpOutcome::Disconnected(e.to_string());
        }
    }

    loop {
        tokio::select! {
            next = outgoing.recv() => {
                let Some(text) = next else {
                    let _ = sink.close().await;
                    return PumpOutcome::Stopped;
                };
                if let Err(e) = sink.send(WsMessage::Text(text.clone())).await {
                    unsent.push_back(text);
                    return PumpOutcome::Disconnected(e.to_string());
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if incoming.send(text).is_err() {
                            let _ = sink.close().await;
                            return PumpOutcome::Stopped;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        return PumpOutcome::Disconnected("closed by server".to_owned());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return PumpOutcome::Disconnected(e.to_string()),
                }
            }
        }
    }
}

/// Tunnel client settings
#[derive(Debug, Clone)]
pub struct TunnelClientConfig {
    /// Server tunnel endpoint, e.g. `ws://host:8080/api/tunnel`
    pub server_url: String,
    /// Only URLs with this prefix are fetched
    pub allowed_prefix: Option<String>,
    /// Delay before reconnecting after a socket failure
    pub reconnect_delay: Duration,
}

impl TunnelClientConfig {
    /// Settings with the default reconnect delay
    #[must_use]
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            allowed_prefix: None,
            reconnect_delay: Duration::from_millis(RECONNECT_DELAY_MS),
        }
    }
}

/// Run the tunnel client until the socket loop stops
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be created
pub async fn run_tunnel_client(config: TunnelClientConfig) -> AppResult<()> {
    let executor = Arc::new(TunnelExecutor::new(config.allowed_prefix.clone())?);
    let (socket, mut incoming) = QueuedSocket::spawn(
        UrlSocketFactory::new(config.server_url.clone()),
        config.reconnect_delay,
    );
    info!(server = %config.server_url, "Tunnel client started");

    while let Some(text) = incoming.recv().await {
        let message = match serde_json::from_str::<TunnelMessage>(&text) {
            Ok(message @ TunnelMessage::Request { .. }) => message,
            Ok(other) => {
                debug!(frame = ?other.id(), "Ignoring non-request tunnel frame");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Ignoring malformed tunnel frame");
                continue;
            }
        };

        let executor = Arc::clone(&executor);
        let outgoing = socket.outgoing.clone();
        tokio::spawn(async move {
            let mut frames = executor.execute(message);
            while let Some(frame) = frames.next().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        error!(error = %e, "Failed to serialize tunnel frame");
                        continue;
                    }
                };
                if outgoing.send(text).is_err() {
                    return;
                }
            }
        });
    }

    socket.close();
    Ok(())
}
