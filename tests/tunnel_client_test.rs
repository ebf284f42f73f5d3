// ABOUTME: Tests for the tunnel client executor, the queued socket, and the full tunnel round trip
// ABOUTME: Uses loopback axum servers for both the relayed HTTP target and the WebSocket endpoint
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chatloom::errors::{AppError, AppResult};
use chatloom::tunnel::client::{run_tunnel_client, TunnelSocket};
use chatloom::tunnel::{
    decode_chunk, QueuedSocket, SocketFactory, TunnelClientConfig, TunnelExecutor, TunnelHeaders,
    TunnelMessage, TunnelRequest,
};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

// ============================================================================
// Loopback Servers
// ============================================================================

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Stand-in for a local model server
async fn spawn_model_server() -> SocketAddr {
    let app = Router::new()
        .route("/api/tags", get(|| async { Json(json!({"models": [{"name": "llama3"}]})) }))
        .route(
            "/api/echo",
            post(|Json(body): Json<Value>| async move { Json(json!({"echo": body})) }),
        )
        .route(
            "/api/stream",
            get(|| async {
                let chunks = futures_util::stream::iter(["one\n", "two\n", "three\n"])
                    .then(|chunk| async move {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok::<_, std::io::Error>(chunk)
                    });
                Response::builder()
                    .header("content-type", "application/x-ndjson")
                    .body(Body::from_stream(chunks))
                    .unwrap()
            }),
        );
    serve(app).await
}

#[derive(Clone)]
struct EchoState {
    received: mpsc::UnboundedSender<String>,
    connections: Arc<AtomicUsize>,
}

/// WebSocket server recording every text frame; "bye" makes it close the socket
async fn spawn_socket_server() -> (SocketAddr, mpsc::UnboundedReceiver<String>, Arc<AtomicUsize>) {
    async fn upgrade(ws: WebSocketUpgrade, State(state): State<EchoState>) -> Response {
        ws.on_upgrade(move |socket| handle(socket, state))
    }

    async fn handle(mut socket: WebSocket, state: EchoState) {
        state.connections.fetch_add(1, Ordering::SeqCst);
        while let Some(Ok(frame)) = socket.recv().await {
            if let Message::Text(text) = frame {
                let _ = state.received.send(text.clone());
                if text == "bye" {
                    let _ = socket.send(Message::Close(None)).await;
                    return;
                }
                let _ = socket.send(Message::Text(format!("echo:{text}"))).await;
            }
        }
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let connections = Arc::new(AtomicUsize::new(0));
    let state = EchoState {
        received: tx,
        connections: Arc::clone(&connections),
    };
    let app = Router::new().route("/ws", get(upgrade)).with_state(state);
    (serve(app).await, rx, connections)
}

/// Factory that fails a fixed number of times before connecting
struct FlakyFactory {
    url: String,
    failures_left: AtomicUsize,
    attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl SocketFactory for FlakyFactory {
    async fn connect(&self) -> AppResult<TunnelSocket> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AppError::external_unavailable("tunnel", "scripted refusal"));
        }
        let (socket, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| AppError::external_unavailable("tunnel", e.to_string()))?;
        Ok(socket)
    }
}

async fn recv_within(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("nothing received within timeout")
        .expect("channel closed")
}

fn request(id: &str, method: &str, url: String, body: Option<String>) -> TunnelMessage {
    let mut headers = TunnelHeaders::new();
    if body.is_some() {
        headers.insert("content-type".to_owned(), "application/json".to_owned());
    }
    TunnelMessage::Request {
        id: id.to_owned(),
        method: method.to_owned(),
        url,
        headers,
        body,
    }
}

// ============================================================================
// Executor
// ============================================================================

#[tokio::test]
async fn test_executor_streams_init_chunks_and_response() {
    let addr = spawn_model_server().await;
    let executor = TunnelExecutor::new(None).unwrap();

    let frames: Vec<TunnelMessage> = executor
        .execute(request("r1", "GET", format!("http://{addr}/api/stream"), None))
        .collect()
        .await;

    let Some(TunnelMessage::ResponseInit {
        id,
        headers,
        status_code,
    }) = frames.first()
    else {
        panic!("first frame must be response-init: {frames:?}");
    };
    assert_eq!(id, "r1");
    assert_eq!(*status_code, 200);
    assert_eq!(
        headers.get("content-type").map(String::as_str),
        Some("application/x-ndjson")
    );

    let streamed: Vec<u8> = frames
        .iter()
        .filter_map(|frame| match frame {
            TunnelMessage::ResponseChunk { chunk, .. } => Some(decode_chunk(chunk).unwrap()),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(streamed, b"one\ntwo\nthree\n");

    match frames.last().unwrap() {
        TunnelMessage::Response {
            id,
            body,
            status_code,
            ..
        } => {
            assert_eq!(id, "r1");
            assert_eq!(body, "one\ntwo\nthree\n");
            assert_eq!(*status_code, 200);
        }
        other => panic!("last frame must be response, got {other:?}"),
    }
}

#[tokio::test]
async fn test_executor_forwards_method_headers_and_body() {
    let addr = spawn_model_server().await;
    let executor = TunnelExecutor::new(None).unwrap();

    let frames: Vec<TunnelMessage> = executor
        .execute(request(
            "r2",
            "post",
            format!("http://{addr}/api/echo"),
            Some(r#"{"prompt":"hi"}"#.to_owned()),
        ))
        .collect()
        .await;

    let TunnelMessage::Response { body, .. } = frames.last().unwrap() else {
        panic!("expected a final response");
    };
    let parsed: Value = serde_json::from_str(body).unwrap();
    assert_eq!(parsed, json!({"echo": {"prompt": "hi"}}));
}

#[tokio::test]
async fn test_executor_refuses_urls_outside_prefix() {
    let addr = spawn_model_server().await;
    let executor = TunnelExecutor::new(Some(format!("http://{addr}/api/"))).unwrap();

    let frames: Vec<TunnelMessage> = executor
        .execute(request("r3", "GET", "http://169.254.169.254/latest".to_owned(), None))
        .collect()
        .await;
    assert_eq!(frames.len(), 1);
    match &frames[0] {
        TunnelMessage::Error { id, error } => {
            assert_eq!(id, "r3");
            assert!(error.contains("not allowed"));
        }
        other => panic!("expected an error frame, got {other:?}"),
    }

    let allowed: Vec<TunnelMessage> = executor
        .execute(request("r4", "GET", format!("http://{addr}/api/tags"), None))
        .collect()
        .await;
    assert!(matches!(allowed.last(), Some(TunnelMessage::Response { .. })));
}

#[tokio::test]
async fn test_executor_reports_connection_failure() {
    let executor = TunnelExecutor::new(None).unwrap();
    // Bind then drop to get a port nobody listens on
    let port = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let frames: Vec<TunnelMessage> = executor
        .execute(request("r5", "GET", format!("http://127.0.0.1:{port}/"), None))
        .collect()
        .await;
    assert_eq!(frames.len(), 1);
    assert!(matches!(&frames[0], TunnelMessage::Error { id, .. } if id == "r5"));
}

#[tokio::test]
async fn test_executor_ignores_non_request_frames() {
    let executor = TunnelExecutor::new(None).unwrap();
    let frames: Vec<TunnelMessage> = executor
        .execute(TunnelMessage::error("x", "nope"))
        .collect()
        .await;
    assert!(frames.is_empty());
}

// ============================================================================
// Queued Socket
// ============================================================================

#[tokio::test]
async fn test_queued_socket_buffers_until_connected() {
    let (addr, mut received, _) = spawn_socket_server().await;
    let attempts = Arc::new(AtomicUsize::new(0));
    let factory = FlakyFactory {
        url: format!("ws://{addr}/ws"),
        failures_left: AtomicUsize::new(2),
        attempts: Arc::clone(&attempts),
    };

    let (socket, mut incoming) = QueuedSocket::spawn(factory, Duration::from_millis(20));
    socket.send("first".to_owned()).unwrap();
    socket.send("second".to_owned()).unwrap();
    socket.send("third".to_owned()).unwrap();

    assert_eq!(recv_within(&mut received).await, "first");
    assert_eq!(recv_within(&mut received).await, "second");
    assert_eq!(recv_within(&mut received).await, "third");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    assert_eq!(recv_within(&mut incoming).await, "echo:first");
    socket.close();
}

#[tokio::test]
async fn test_queued_socket_reconnects_after_close() {
    let (addr, mut received, connections) = spawn_socket_server().await;
    let factory = FlakyFactory {
        url: format!("ws://{addr}/ws"),
        failures_left: AtomicUsize::new(0),
        attempts: Arc::new(AtomicUsize::new(0)),
    };

    let (socket, _incoming) = QueuedSocket::spawn(factory, Duration::from_millis(20));
    socket.send("bye".to_owned()).unwrap();
    assert_eq!(recv_within(&mut received).await, "bye");

    tokio::time::timeout(Duration::from_secs(5), async {
        while connections.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("socket did not reconnect");

    socket
        .send_message(&TunnelMessage::error("id-1", "after reconnect"))
        .unwrap();
    let frame: TunnelMessage = serde_json::from_str(&recv_within(&mut received).await).unwrap();
    assert_eq!(frame, TunnelMessage::error("id-1", "after reconnect"));
    socket.close();
}

// ============================================================================
// Full Round Trip
// ============================================================================

#[tokio::test]
async fn test_server_fetch_through_running_client() {
    let model_addr = spawn_model_server().await;
    let resources = common::create_test_resources(Vec::new(), common::test_generation_config())
        .await
        .unwrap();
    let server_addr = serve(chatloom::routes::router(Arc::clone(&resources))).await;

    let mut config = TunnelClientConfig::new(format!("ws://{server_addr}/api/tunnel"));
    config.allowed_prefix = Some(format!("http://{model_addr}/"));
    config.reconnect_delay = Duration::from_millis(20);
    let client = tokio::spawn(run_tunnel_client(config));

    tokio::time::timeout(Duration::from_secs(5), async {
        while !resources.tunnel_hub.is_connected().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("tunnel client did not connect");

    let response = resources
        .tunnel_hub
        .fetch(TunnelRequest::get(format!("http://{model_addr}/api/stream")))
        .await
        .unwrap();
    assert!(response.is_success());
    assert_eq!(response.text().await.unwrap(), "one\ntwo\nthree\n");

    let err = resources
        .tunnel_hub
        .fetch(TunnelRequest::get("http://elsewhere.invalid/"))
        .await
        .unwrap_err();
    assert!(err.message.contains("not allowed"));

    client.abort();
}
