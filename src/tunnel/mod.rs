// ABOUTME: Request tunnel multiplexing HTTP over a single WebSocket
// ABOUTME: Server-side hub, client-side executor and queued socket, plus the shared wire protocol
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

//! # Request Tunnel
//!
//! Lets a server that cannot reach a local model server route HTTP through a
//! client machine that can. The server holds a [`TunnelHub`]; the client runs
//! [`client::run_tunnel_client`].

pub mod client;
mod hub;

pub use chatloom_core::tunnel::{decode_chunk, TunnelHeaders, TunnelMessage};
pub use client::{QueuedSocket, SocketFactory, TunnelClientConfig, TunnelExecutor};
pub use hub::{TunnelBodyReceiver, TunnelHub, TunnelRequest, TunnelResponse};
