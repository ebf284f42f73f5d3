// ABOUTME: Leading-edge rate limiter for generation progress updates
// ABOUTME: Emits the first update immediately, then at most one per window; drops the rest
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

use std::time::Duration;

use tokio::time::Instant;

/// Per-generation progress throttle
///
/// An update passes only if at least one full window elapsed since the last
/// update that passed. Dropped updates are never replayed; the completion path
/// always delivers the final text on its own.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    window: Duration,
    last_emit: Option<Instant>,
}

impl ProgressThrottle {
    /// Throttle with the given window
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            last_emit: None,
        }
    }

    /// Decide whether an update arriving at `now` is emitted, recording it if so
    pub fn should_emit(&mut self, now: Instant) -> bool {
        let due = match self.last_emit {
            Some(last) => now.saturating_duration_since(last) >= self.window,
            None => true,
        };
        if due {
            self.last_emit = Some(now);
        }
        due
    }

    /// Window length
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }
}
