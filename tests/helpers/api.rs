// ABOUTME: In-process request helpers for the chatloom HTTP API
// ABOUTME: JSON requests with decoded responses, plus an SSE reader for the event stream
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

use std::time::Duration;

use axum::{
    body::{to_bytes, Body, BodyDataStream},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chatloom::constants::endpoints;
use chatloom::events::SubscriptionEvent;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tower::ServiceExt;

/// A request against the API router, sent without a listening socket
pub struct ApiRequest {
    method: Method,
    uri: String,
    body: Option<Value>,
}

impl ApiRequest {
    fn new(method: Method, uri: &str) -> Self {
        Self {
            method,
            uri: uri.to_owned(),
            body: None,
        }
    }

    pub fn get(uri: &str) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: &str) -> Self {
        Self::new(Method::POST, uri)
    }

    pub fn put(uri: &str) -> Self {
        Self::new(Method::PUT, uri)
    }

    pub fn delete(uri: &str) -> Self {
        Self::new(Method::DELETE, uri)
    }

    /// Attach a JSON body
    pub fn json(mut self, body: &Value) -> Self {
        self.body = Some(body.clone());
        self
    }

    fn build(self) -> Request<Body> {
        let builder = Request::builder().method(self.method).uri(self.uri);
        let request = match self.body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        };
        request.expect("request builds")
    }

    /// Run the request and read the whole body
    pub async fn send(self, app: Router) -> ApiResponse {
        let response = app.oneshot(self.build()).await.expect("router answers");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body is readable")
            .to_vec();
        ApiResponse { status, body }
    }
}

/// Status and body of a finished API call
pub struct ApiResponse {
    status: StatusCode,
    body: Vec<u8>,
}

impl ApiResponse {
    pub const fn status(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn assert_status(self, expected: StatusCode) -> Self {
        assert_eq!(
            self.status,
            expected,
            "unexpected status, body: {}",
            String::from_utf8_lossy(&self.body)
        );
        self
    }

    pub fn json<T: DeserializeOwned>(self) -> T {
        serde_json::from_slice(&self.body).expect("body is JSON")
    }

    /// `error.code` of an error body
    pub fn error_code(self) -> String {
        let body: Value = self.json();
        body["error"]["code"]
            .as_str()
            .expect("error body carries a code")
            .to_owned()
    }
}

/// An open `/api/events` subscription
pub struct EventStream {
    pub status: StatusCode,
    pub content_type: Option<String>,
    body: BodyDataStream,
    buffer: String,
}

impl EventStream {
    /// Subscribe; the bus channel is attached once this returns
    pub async fn open(app: Router) -> Self {
        let response = app
            .oneshot(ApiRequest::get(endpoints::EVENTS).build())
            .await
            .expect("router answers");
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(ToOwned::to_owned);
        Self {
            status,
            content_type,
            body: response.into_body().into_data_stream(),
            buffer: String::new(),
        }
    }

    /// Next `data:` frame, decoded; keep-alive comments are skipped
    pub async fn next_event(&mut self) -> SubscriptionEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                while let Some(end) = self.buffer.find("\n\n") {
                    let block: String = self.buffer.drain(..end + 2).collect();
                    let data: Vec<&str> = block
                        .lines()
                        .filter_map(|line| line.strip_prefix("data:"))
                        .map(str::trim_start)
                        .collect();
                    if !data.is_empty() {
                        return serde_json::from_str(&data.join("\n")).expect("event is JSON");
                    }
                }
                let chunk = self
                    .body
                    .next()
                    .await
                    .expect("event stream ended")
                    .expect("event stream chunk");
                self.buffer.push_str(&String::from_utf8_lossy(&chunk));
            }
        })
        .await
        .expect("no event within timeout")
    }
}
