// Copyright 2026 WebHarvest Contributors
// SPDX-License-Identifier: Apache-2.0

//! Progress events and the broadcast channel that carries them.
//!
//! The pipeline emits a [`ProgressEvent`] at each checkpoint (fetch start,
//! challenge detected, content ready, extraction start, ...). Events flow
//! through a `tokio::sync::broadcast` channel to any number of subscribers.
//! Sending never blocks; with no subscriber the event is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A progress event emitted at a pipeline checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Monotonically increasing sequence number.
    pub seq: u64,
    pub stage: ProgressStage,
    /// Human-readable status line.
    pub message: String,
}

/// Pipeline checkpoint that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgressStage {
    FetchStarted,
    PageFetched,
    ChallengeDetected,
    CaptchaWaiting,
    ContentReady,
    ExtractionStarted,
    ExtractionComplete,
    Warning,
}

impl std::fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FetchStarted => write!(f, "Fetch"),
            Self::PageFetched => write!(f, "Page"),
            Self::ChallengeDetected => write!(f, "Challenge"),
            Self::CaptchaWaiting => write!(f, "CAPTCHA"),
            Self::ContentReady => write!(f, "Ready"),
            Self::ExtractionStarted => write!(f, "Extract"),
            Self::ExtractionComplete => write!(f, "Done"),
            Self::Warning => write!(f, "Warning"),
        }
    }
}

pub type ProgressReceiver = tokio::sync::broadcast::Receiver<ProgressEvent>;

/// Cloneable, non-blocking progress emitter.
#[derive(Clone)]
pub struct ProgressSink {
    tx: tokio::sync::broadcast::Sender<ProgressEvent>,
    seq: Arc<AtomicU64>,
}

impl ProgressSink {
    /// Create a sink with a bounded buffer of 256 events. Slow subscribers
    /// lag and lose the oldest events instead of stalling the pipeline.
    pub fn new() -> Self {
        let (tx, _rx) = tokio::sync::broadcast::channel(256);
        Self {
            tx,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> ProgressReceiver {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring the error returned when nobody listens.
    pub fn emit(&self, stage: ProgressStage, message: impl Into<String>) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let message = message.into();
        tracing::debug!("progress [{stage}] {message}");
        let _ = self.tx.send(ProgressEvent {
            seq,
            stage,
            message,
        });
    }
}

impl Default for ProgressSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers() {
        let sink = ProgressSink::new();
        // Should not panic or block.
        sink.emit(ProgressStage::Warning, "nobody listening");
    }

    #[tokio::test]
    async fn test_subscriber_sees_ordered_events() {
        let sink = ProgressSink::new();
        let mut rx = sink.subscribe();

        sink.emit(ProgressStage::FetchStarted, "Fetching content from Example...");
        sink.emit(ProgressStage::ContentReady, "Content ready");

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.stage, ProgressStage::FetchStarted);
        assert_eq!(second.stage, ProgressStage::ContentReady);
        assert!(second.seq > first.seq);
    }

    #[test]
    fn test_event_serialization() {
        let event = ProgressEvent {
            seq: 3,
            stage: ProgressStage::ChallengeDetected,
            message: "Challenge detected, retrying (1/3)".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("ChallengeDetected"));
        let parsed: ProgressEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.seq, 3);
    }
}
