// ABOUTME: Generation module tying message mutations to background provider calls
// ABOUTME: Exposes the pipeline, its result types, and the progress throttle
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Chatloom Contributors

mod pipeline;
mod throttle;

pub use pipeline::{CreatedChat, EditOutcome, GenerationPipeline, SentMessages};
pub use throttle::ProgressThrottle;
