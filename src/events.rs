//! # Fetch Retry Events
//!
//! This module provides a broadcast channel for retry events emitted by the
//! fetch client, so callers can surface backoff activity (progress bars, logs)
//! without polling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted by the fetch client while retrying requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FetchEvent {
    /// A failed attempt will be retried after a backoff delay.
    RetryScheduled {
        timestamp: DateTime<Utc>,
        /// The URL being fetched
        url: String,
        /// The attempt that failed (1-based)
        attempt: u32,
        /// Maximum number of attempts
        max_attempts: u32,
        /// Backoff delay before the next attempt, including jitter
        delay_ms: u64,
        /// Display form of the failure
        reason: String,
    },
    /// All attempts failed; the failure is surfaced to the caller.
    RetriesExhausted {
        timestamp: DateTime<Utc>,
        url: String,
        attempts: u32,
        reason: String,
    },
}

/// A handle for receiving fetch events.
pub type FetchEventReceiver = broadcast::Receiver<FetchEvent>;

/// A handle for sending fetch events.
pub type FetchEventSender = broadcast::Sender<FetchEvent>;

/// Creates a new broadcast channel for fetch events.
///
/// The channel has a capacity of 100 events; slow receivers observe
/// `RecvError::Lagged` rather than blocking the fetch client.
pub fn create_fetch_event_channel() -> (FetchEventSender, FetchEventReceiver) {
    broadcast::channel(100)
}

/// Helper trait for emitting fetch events.
pub trait FetchEventEmitter {
    fn emit_retry_scheduled(
        &self,
        url: &str,
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        reason: &str,
    );

    fn emit_retries_exhausted(&self, url: &str, attempts: u32, reason: &str);
}

impl FetchEventEmitter for Option<FetchEventSender> {
    fn emit_retry_scheduled(
        &self,
        url: &str,
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        reason: &str,
    ) {
        if let Some(sender) = self {
            let event = FetchEvent::RetryScheduled {
                timestamp: Utc::now(),
                url: url.to_string(),
                attempt,
                max_attempts,
                delay_ms,
                reason: reason.to_string(),
            };
            let _ = sender.send(event); // Ignore send errors (no receivers)
        }
    }

    fn emit_retries_exhausted(&self, url: &str, attempts: u32, reason: &str) {
        if let Some(sender) = self {
            let event = FetchEvent::RetriesExhausted {
                timestamp: Utc::now(),
                url: url.to_string(),
                attempts,
                reason: reason.to_string(),
            };
            let _ = sender.send(event); // Ignore send errors (no receivers)
        }
    }
}
