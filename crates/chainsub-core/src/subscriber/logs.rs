//! Contract log subscriber. No reconciliation: logs emitted while
//! disconnected are not replayed.

use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{ReconnectConfig, StateCell, Step, SubscriberState};
use crate::connection::{
    sleep_or_cancel, Connection, ConnectionManager, Connector, Subscription, SubscriptionEvent,
};
use crate::error::SubscriberError;
use crate::sink::EventSink;
use crate::types::{Log, LogFilter};

/// Forwards every log matching a fixed filter, resubscribing after failures.
///
/// Logs are not de-duplicated; a sink may see the same log twice around a
/// reconnect, and logs flagged `removed` by a reorg are passed through as is.
pub struct LogSubscriber<C, S> {
    manager: ConnectionManager<C>,
    filter: LogFilter,
    reconnect: ReconnectConfig,
    sink: S,
    delivered: u64,
    state: StateCell,
}

impl<C, S> LogSubscriber<C, S>
where
    C: Connector,
    S: EventSink<Log>,
{
    pub fn new(connector: C, url: impl Into<String>, filter: LogFilter, sink: S) -> Self {
        if filter.is_match_all() {
            tracing::warn!("no contract address given, subscribing to all logs on the network");
        }
        Self {
            manager: ConnectionManager::new(connector, url),
            filter,
            reconnect: ReconnectConfig::default(),
            sink,
            delivered: 0,
            state: StateCell::new("logs"),
        }
    }

    pub fn with_reconnect(mut self, config: ReconnectConfig) -> Self {
        self.reconnect = config;
        self
    }

    pub fn filter(&self) -> &LogFilter {
        &self.filter
    }

    /// Logs handed to the sink so far, duplicates included.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn state(&self) -> SubscriberState {
        self.state.get()
    }

    pub fn watch_state(&self) -> watch::Receiver<SubscriberState> {
        self.state.watch()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Run until `cancel` fires.
    pub async fn run(&mut self, cancel: &CancellationToken) {
        tracing::info!(
            url = %self.manager.url(),
            addresses = ?self.filter.addresses,
            "log subscriber starting"
        );
        let mut backoff: Option<Duration> = None;
        loop {
            if let Some(delay) = backoff.take() {
                self.state.set(SubscriberState::Disconnected);
                tracing::info!(retry_in_ms = delay.as_millis() as u64, "reconnecting after delay");
                if !sleep_or_cancel(cancel, delay).await {
                    break;
                }
            }

            self.state.set(SubscriberState::Connecting);
            let conn = match self.manager.connect(cancel).await {
                Ok(conn) => conn,
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    tracing::warn!(error = %e, cause = %e.cause(), "dial failed");
                    backoff = Some(self.reconnect.dial_retry);
                    continue;
                }
            };

            let step = self.session(cancel, &conn).await;
            self.manager.close(conn).await;
            match step {
                Step::Shutdown => break,
                Step::Retry(delay) => backoff = Some(delay),
            }
        }
        self.state.set(SubscriberState::Shutdown);
        tracing::info!(delivered = self.delivered, "log subscriber stopped");
    }

    async fn session(&mut self, cancel: &CancellationToken, conn: &C::Conn) -> Step {
        if cancel.is_cancelled() {
            return Step::Shutdown;
        }
        let mut sub = match conn.subscribe_logs(&self.filter).await {
            Ok(sub) => sub,
            Err(source) => {
                let e = SubscriberError::SubscribeFailed { kind: "logs", source };
                tracing::warn!(error = %e, cause = %e.cause(), "subscribe failed");
                return Step::Retry(self.reconnect.subscribe_retry);
            }
        };
        tracing::info!("subscribed to logs");
        self.state.set(SubscriberState::Live);

        let step = self.forward(cancel, &mut sub).await;
        sub.unsubscribe().await;
        step
    }

    async fn forward(&mut self, cancel: &CancellationToken, sub: &mut Subscription<Log>) -> Step {
        loop {
            match sub.next_event(cancel).await {
                SubscriptionEvent::Item(log) => {
                    if log.removed {
                        tracing::debug!(tx = %log.tx_hash, index = log.log_index, "log removed by reorg");
                    }
                    self.sink.deliver(&log);
                    self.delivered += 1;
                }
                SubscriptionEvent::Cancelled => {
                    tracing::info!("cancelled, unsubscribing");
                    return Step::Shutdown;
                }
                SubscriptionEvent::Failed(source) => {
                    let e = SubscriberError::Subscription(source);
                    tracing::warn!(error = %e, cause = %e.cause(), "reconnecting");
                    return Step::Retry(self.reconnect.subscription_error);
                }
                SubscriptionEvent::Closed => {
                    tracing::warn!(error = %SubscriberError::ChannelClosed, "reconnecting");
                    return Step::Retry(self.reconnect.channel_closed);
                }
            }
        }
    }
}
