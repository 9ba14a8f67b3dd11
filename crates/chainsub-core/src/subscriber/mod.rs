//! Reconnecting subscriber loops.
//!
//! ```text
//!            ┌──────────────── dial failed (5s) ───────────────┐
//!            ▼                                                  │
//! Disconnected ──► Connecting ──► Reconciling ──► Live ─────────┤
//!            ▲                       │  head fetch failed (2s)  │ error signal (2s)
//!            │                       │  subscribe failed (5s)   │ channel closed (1s)
//!            └───────────────────────┴──────────────────────────┘
//!
//! any state ── cancellation ──► Shutdown
//! ```
//!
//! The log subscriber skips `Reconciling`.

mod head;
mod logs;

pub use head::HeadSubscriber;
pub use logs::LogSubscriber;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::policy::retry::duration_ms;

/// Where a subscriber loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriberState {
    /// No connection; waiting out a backoff.
    Disconnected,
    /// Dialing the endpoint.
    Connecting,
    /// Fetching the network head and backfilling the gap.
    Reconciling,
    /// Subscribed and forwarding items.
    Live,
    /// Cancelled; the loop has returned.
    Shutdown,
}

impl std::fmt::Display for SubscriberState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Reconciling => write!(f, "reconciling"),
            Self::Live => write!(f, "live"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Fixed waits between reconnect attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// After a failed dial.
    #[serde(with = "duration_ms")]
    pub dial_retry: Duration,
    /// After the network head could not be fetched.
    #[serde(with = "duration_ms")]
    pub head_fetch_retry: Duration,
    /// After `eth_subscribe` failed.
    #[serde(with = "duration_ms")]
    pub subscribe_retry: Duration,
    /// After a live subscription signalled an error.
    #[serde(with = "duration_ms")]
    pub subscription_error: Duration,
    /// After the item channel closed on its own.
    #[serde(with = "duration_ms")]
    pub channel_closed: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            dial_retry: Duration::from_secs(5),
            head_fetch_retry: Duration::from_secs(2),
            subscribe_retry: Duration::from_secs(5),
            subscription_error: Duration::from_secs(2),
            channel_closed: Duration::from_secs(1),
        }
    }
}

/// Last processed block height for a head subscriber.
///
/// Stored as the next height expected so that an explicit start height of
/// zero is representable without a negative sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watermark {
    /// No start height given; seeded from the network head on first contact.
    Unset,
    /// Every height below this one has been handled.
    Next(u64),
}

impl Watermark {
    /// Watermark for an optional explicit start height.
    pub fn starting_at(start: Option<u64>) -> Self {
        start.map_or(Self::Unset, Self::Next)
    }

    /// The last height handed to the sink, if any.
    pub fn last_processed(self) -> Option<u64> {
        match self {
            Self::Unset => None,
            Self::Next(n) => n.checked_sub(1),
        }
    }

    /// Height the sink should see next, if known.
    pub fn next(self) -> Option<u64> {
        match self {
            Self::Unset => None,
            Self::Next(n) => Some(n),
        }
    }

    /// `true` if `height` was already handled.
    pub fn covers(self, height: u64) -> bool {
        matches!(self, Self::Next(n) if height < n)
    }

    /// Record `height` as handled. Never moves backwards.
    pub fn advance_to(&mut self, height: u64) {
        let next = height.saturating_add(1);
        match self {
            Self::Next(n) if *n >= next => {}
            _ => *self = Self::Next(next),
        }
    }
}

impl std::fmt::Display for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.last_processed() {
            Some(h) => write!(f, "{h}"),
            None if *self == Self::Unset => write!(f, "unset"),
            None => write!(f, "none"),
        }
    }
}

/// Publishes state transitions to observers and the log.
struct StateCell {
    kind: &'static str,
    tx: watch::Sender<SubscriberState>,
}

impl StateCell {
    fn new(kind: &'static str) -> Self {
        let (tx, _) = watch::channel(SubscriberState::Disconnected);
        Self { kind, tx }
    }

    fn set(&self, state: SubscriberState) {
        let prev = self.tx.send_replace(state);
        if prev != state {
            tracing::debug!(subscriber = self.kind, from = %prev, to = %state, "state change");
        }
    }

    fn get(&self) -> SubscriberState {
        *self.tx.borrow()
    }

    fn watch(&self) -> watch::Receiver<SubscriberState> {
        self.tx.subscribe()
    }
}

/// What the outer loop does after a connection session ends.
enum Step {
    /// Cancellation observed; stop for good.
    Shutdown,
    /// Close the connection, wait, and dial again.
    Retry(Duration),
}
