// ABOUTME: Process-wide fan-out of subscription events to SSE streams and WebSocket connections
// ABOUTME: Serializes each event once, prunes dead channels lazily, and runs the heartbeat timer
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

//! # Broadcast Bus
//!
//! Every attached client gets its own unbounded channel of serialized event
//! frames, so a slow or dead client never blocks the others. Delivery is FIFO
//! per channel; there is no ordering across channels. Events are lossy: a
//! client that is not attached when an event fires never sees it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::events::SubscriptionEvent;

/// Kind of client behind a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Server-Sent Events response
    EventStream,
    /// WebSocket connection
    Socket,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EventStream => write!(f, "event-stream"),
            Self::Socket => write!(f, "socket"),
        }
    }
}

#[derive(Debug)]
struct Channel {
    kind: ChannelKind,
    tx: mpsc::UnboundedSender<String>,
    attached_at: DateTime<Utc>,
}

/// Fan-out service shared through `Arc`
#[derive(Debug, Default)]
pub struct BroadcastBus {
    channels: RwLock<HashMap<Uuid, Channel>>,
}

/// An attached event stream; dropping it detaches the channel
pub struct EventStreamHandle {
    id: Uuid,
    receiver: mpsc::UnboundedReceiver<String>,
    bus: Arc<BroadcastBus>,
}

impl EventStreamHandle {
    /// Channel id
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Next serialized event frame; `None` once the bus dropped the channel
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }
}

impl Drop for EventStreamHandle {
    fn drop(&mut self) {
        // If the map is busy, the closed receiver is pruned on the next broadcast
        if let Ok(mut channels) = self.bus.channels.try_write() {
            channels.remove(&self.id);
            debug!(channel_id = %self.id, "Event stream detached");
        }
    }
}

impl BroadcastBus {
    /// Create an empty bus
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn register(&self, id: Uuid, kind: ChannelKind) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Channel {
            kind,
            tx,
            attached_at: Utc::now(),
        };
        let total = {
            let mut channels = self.channels.write().await;
            channels.insert(id, channel);
            channels.len()
        };
        debug!(channel_id = %id, kind = %kind, total, "Channel attached");
        rx
    }

    /// Attach a Server-Sent Events client
    pub async fn attach_event_stream(self: &Arc<Self>) -> EventStreamHandle {
        let id = Uuid::new_v4();
        let receiver = self.register(id, ChannelKind::EventStream).await;
        EventStreamHandle {
            id,
            receiver,
            bus: Arc::clone(self),
        }
    }

    /// Attach a WebSocket connection; the caller forwards frames to the socket
    pub async fn attach_socket(&self, connection_id: Uuid) -> mpsc::UnboundedReceiver<String> {
        self.register(connection_id, ChannelKind::Socket).await
    }

    /// Detach a channel
    pub async fn detach(&self, id: Uuid) {
        if let Some(channel) = self.channels.write().await.remove(&id) {
            let lifetime = Utc::now() - channel.attached_at;
            debug!(
                channel_id = %id,
                kind = %channel.kind,
                seconds = lifetime.num_seconds(),
                "Channel detached"
            );
        }
    }

    /// Number of attached channels
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Deliver an event to every attached channel
    ///
    /// Returns the number of channels that accepted it. Channels whose receiver
    /// is gone are removed.
    pub async fn broadcast(&self, event: &SubscriptionEvent) -> usize {
        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "Failed to serialize subscription event");
                return 0;
            }
        };

        let (delivered, dead) = {
            let channels = self.channels.read().await;
            let mut delivered = 0;
            let mut dead = Vec::new();
            for (id, channel) in channels.iter() {
                if channel.tx.send(frame.clone()).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(*id);
                }
            }
            (delivered, dead)
        };

        if !dead.is_empty() {
            let mut channels = self.channels.write().await;
            for id in &dead {
                channels.remove(id);
            }
            debug!(removed = dead.len(), "Pruned closed channels");
        }

        trace!(delivered, "Event broadcast");
        delivered
    }

    /// Start the global heartbeat timer
    ///
    /// The first heartbeat fires one full interval after the call.
    #[must_use]
    pub fn start_heartbeat(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                bus.broadcast(&SubscriptionEvent::heartbeat()).await;
            }
        })
    }
}
