// ABOUTME: Server-Sent Events subscription route streaming broadcast bus events
// ABOUTME: Each response owns one bus channel that detaches when the client goes away
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use tokio_stream::Stream;
use tracing::info;

use crate::constants::endpoints;
use crate::resources::ServerResources;

/// Event stream routes implementation
pub struct EventRoutes;

impl EventRoutes {
    /// Create the SSE subscription route
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route(endpoints::EVENTS, get(Self::subscribe))
            .with_state(resources)
    }

    /// Stream every broadcast event as `data: <json>`
    async fn subscribe(
        State(resources): State<Arc<ServerResources>>,
    ) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        let mut handle = resources.bus.attach_event_stream().await;
        info!(channel_id = %handle.id(), "Event stream subscribed");

        // The handle lives inside the stream; dropping the response detaches it
        let stream = async_stream::stream! {
            while let Some(frame) = handle.recv().await {
                yield Ok(Event::default().data(frame));
            }
        };

        Sse::new(stream).keep_alive(KeepAlive::default())
    }
}
