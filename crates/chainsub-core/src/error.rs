//! Transport-level and subscriber-level error types.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors that can occur during an RPC transport operation.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, timeout, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// WebSocket connection/send/receive error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Request timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The node answered `null` for an object that should exist.
    #[error("{what} not found")]
    NotFound { what: String },

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// The connection is gone; nothing further will be delivered on it.
    #[error("Connection closed")]
    Closed,

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if this error is retryable (transient).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::WebSocket(_) | Self::Timeout { .. } | Self::Closed
        )
    }

    /// Returns `true` if this is a node-side execution error (not retryable).
    pub fn is_execution_error(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        Self::Deserialization(e.to_string())
    }
}

/// Errors surfaced by the connection manager, gap scanner and subscribers.
///
/// None of these terminate a subscriber loop except [`SubscriberError::Cancelled`].
#[derive(Debug, Error)]
pub enum SubscriberError {
    /// Dialing the streaming endpoint failed. Always retried with fixed backoff.
    #[error("failed to connect to {url}")]
    DialFailed {
        url: String,
        #[source]
        source: TransportError,
    },

    /// A single header fetch failed after all attempts.
    #[error("failed to fetch {what}")]
    FetchFailed {
        what: String,
        #[source]
        source: TransportError,
    },

    /// The node refused or failed the `eth_subscribe` call.
    #[error("failed to subscribe to {kind}")]
    SubscribeFailed {
        kind: &'static str,
        #[source]
        source: TransportError,
    },

    /// An established subscription signalled an asynchronous failure.
    #[error("subscription terminated")]
    Subscription(#[source] TransportError),

    /// The subscription's item channel closed without an error signal.
    #[error("subscription channel closed")]
    ChannelClosed,

    /// The shared cancellation token fired.
    #[error("cancelled")]
    Cancelled,

    /// A filter address was not 20 bytes of `0x`-prefixed hex.
    #[error("invalid contract address: {0}")]
    InvalidAddress(String),
}

impl SubscriberError {
    /// The wrapped transport error rendered for logs, or empty.
    pub fn cause(&self) -> String {
        std::error::Error::source(self)
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    /// Returns `true` if this error is the cooperative shutdown signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
