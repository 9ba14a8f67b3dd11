//! Streaming connections, subscriptions and the connection manager.
//!
//! A [`Connection`] is owned by exactly one subscriber loop for its whole
//! life. Once it fails it is closed and dropped, never reused. Every
//! [`Subscription`] lives strictly inside the connection that created it.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{SubscriberError, TransportError};
use crate::types::{BlockTag, Header, Log, LogFilter};

/// Dials connections to one kind of streaming endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    type Conn: Connection;

    /// Open a fresh transport session to `url`. Must not retry internally.
    async fn dial(&self, url: &str) -> Result<Self::Conn, TransportError>;
}

/// A live transport session.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Fetch one header. In-flight calls are never interrupted by cancellation.
    async fn header_at(&self, tag: BlockTag) -> Result<Header, TransportError>;

    /// `eth_subscribe("newHeads")`.
    async fn subscribe_new_heads(&self) -> Result<Subscription<Header>, TransportError>;

    /// `eth_subscribe("logs", filter)`.
    async fn subscribe_logs(&self, filter: &LogFilter) -> Result<Subscription<Log>, TransportError>;

    /// Shut the session down. Any remaining subscriptions are dropped silently.
    async fn close(&self);
}

/// The two capabilities every subscription exposes regardless of transport.
#[async_trait]
pub trait SubscriptionHandle: Send {
    /// Resolves once if the subscription terminates unexpectedly; pending
    /// forever otherwise. Must be cancel-safe.
    async fn error_signal(&mut self) -> TransportError;

    /// Tell the node to stop delivering. Best effort.
    async fn unsubscribe(&mut self);
}

/// One inbound event from a live subscription.
#[derive(Debug)]
pub enum SubscriptionEvent<T> {
    /// The shared cancellation token fired.
    Cancelled,
    /// The subscription's error signal fired.
    Failed(TransportError),
    /// The item channel closed without an error signal.
    Closed,
    /// Next delivered item.
    Item(T),
}

/// A live subscription: an item channel plus its control handle.
pub struct Subscription<T> {
    items: mpsc::UnboundedReceiver<T>,
    handle: Box<dyn SubscriptionHandle>,
}

impl<T: Send> Subscription<T> {
    pub fn new(items: mpsc::UnboundedReceiver<T>, handle: Box<dyn SubscriptionHandle>) -> Self {
        Self { items, handle }
    }

    /// Wait for the first of: cancellation, error signal, next item.
    ///
    /// Exactly one event is consumed per call. Cancellation wins ties so
    /// shutdown is never starved by a busy stream.
    pub async fn next_event(&mut self, cancel: &CancellationToken) -> SubscriptionEvent<T> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => SubscriptionEvent::Cancelled,
            err = self.handle.error_signal() => SubscriptionEvent::Failed(err),
            item = self.items.recv() => match item {
                Some(item) => SubscriptionEvent::Item(item),
                None => SubscriptionEvent::Closed,
            },
        }
    }

    pub async fn unsubscribe(&mut self) {
        self.handle.unsubscribe().await;
    }
}

/// Owns dialing and closing for a single endpoint URL.
pub struct ConnectionManager<C> {
    connector: C,
    url: String,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, url: impl Into<String>) -> Self {
        Self {
            connector,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Dial the endpoint, racing the caller's cancellation token.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<C::Conn, SubscriberError> {
        tracing::info!(url = %self.url, "connecting");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SubscriberError::Cancelled),
            res = self.connector.dial(&self.url) => match res {
                Ok(conn) => {
                    tracing::info!(url = %self.url, "connected");
                    Ok(conn)
                }
                Err(source) => Err(SubscriberError::DialFailed {
                    url: self.url.clone(),
                    source,
                }),
            },
        }
    }

    /// Close and drop a connection.
    pub async fn close(&self, conn: C::Conn) {
        conn.close().await;
        tracing::info!(url = %self.url, "disconnected");
    }
}

/// Sleep for `delay` unless cancelled first. Returns `false` on cancellation.
pub(crate) async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
