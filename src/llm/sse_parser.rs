// ABOUTME: Line-buffering Server-Sent Events parser for streamed chat completions
// ABOUTME: Handles partial lines across network reads and several events per read
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

//! # SSE Stream Parser
//!
//! Network reads do not line up with SSE event boundaries. The line buffer keeps
//! any trailing partial line until the next read completes it, and a single read
//! may yield several events. Each provider supplies a `parse_data` closure that
//! turns one `data:` payload into a [`StreamChunk`].

use std::collections::VecDeque;
use std::mem;

use futures_util::stream::unfold;
use futures_util::{future, StreamExt};

use super::{ByteStream, ChatStream, StreamChunk};
use crate::errors::AppError;

/// A parsed SSE event from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A `data:` payload with the prefix stripped
    Data(String),
    /// The `[DONE]` termination signal
    Done,
}

/// Line-buffering SSE parser
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: String,
}

impl SseLineBuffer {
    /// Create a new empty line buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network read, returning the events completed by it
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut events = Vec::new();
        while let Some(newline_pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline_pos).collect();
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Parse whatever is left once the byte stream ended
    pub fn flush(&mut self) -> Vec<SseEvent> {
        let remaining = mem::take(&mut self.buffer);
        parse_line(&remaining).into_iter().collect()
    }
}

fn parse_line(line: &str) -> Option<SseEvent> {
    let trimmed = line.trim();
    if trimmed == "data: [DONE]" {
        return Some(SseEvent::Done);
    }
    // event:, id:, retry: and comment lines carry nothing we use
    trimmed
        .strip_prefix("data:")
        .map(str::trim_start)
        .filter(|data| !data.is_empty())
        .map(|data| SseEvent::Data(data.to_owned()))
}

struct SseStreamState<F> {
    bytes: ByteStream,
    parser: SseLineBuffer,
    pending: VecDeque<Result<StreamChunk, AppError>>,
    stream_ended: bool,
    parse_data: F,
}

impl<F> SseStreamState<F>
where
    F: Fn(&str) -> Option<Result<StreamChunk, AppError>>,
{
    fn enqueue(&mut self, events: Vec<SseEvent>) {
        for event in events {
            match event {
                SseEvent::Data(json) => {
                    if let Some(result) = (self.parse_data)(&json) {
                        self.pending.push_back(result);
                    }
                }
                SseEvent::Done => self.pending.push_back(Ok(StreamChunk::finished("stop"))),
            }
        }
    }
}

/// Wrap a raw body in SSE framing
///
/// `parse_data` returns `None` for payloads that produce no output, such as
/// role-only or metadata chunks. Empty non-final deltas are dropped.
pub fn create_sse_stream<F>(bytes: ByteStream, parse_data: F) -> ChatStream
where
    F: Fn(&str) -> Option<Result<StreamChunk, AppError>> + Send + 'static,
{
    let state = SseStreamState {
        bytes,
        parser: SseLineBuffer::new(),
        pending: VecDeque::new(),
        stream_ended: false,
        parse_data,
    };

    let stream = unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.stream_ended {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(bytes)) => {
                    let events = state.parser.feed(&bytes);
                    state.enqueue(events);
                }
                Some(Err(e)) => {
                    state.stream_ended = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.stream_ended = true;
                    let events = state.parser.flush();
                    state.enqueue(events);
                }
            }
        }
    });

    let filtered = stream.filter(|result| {
        future::ready(
            result
                .as_ref()
                .map_or(true, |chunk| !chunk.delta.is_empty() || chunk.is_final),
        )
    });

    Box::pin(filtered)
}
