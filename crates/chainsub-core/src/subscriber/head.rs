//! New-head subscriber with gap reconciliation on every (re)connect.

use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{ReconnectConfig, StateCell, Step, SubscriberState, Watermark};
use crate::connection::{
    sleep_or_cancel, Connection, ConnectionManager, Connector, Subscription, SubscriptionEvent,
};
use crate::error::SubscriberError;
use crate::scanner::{GapScanner, ScanConfig};
use crate::sink::EventSink;
use crate::types::{BlockTag, Header};

/// Follows the chain head, backfilling whatever was missed while disconnected.
///
/// Every height the sink sees is either part of a backfill range or a live
/// header above the watermark; nothing at or below the watermark is
/// delivered twice by the same subscriber. A height that could not be
/// fetched during backfill is skipped, not retried later.
///
/// # Example
///
/// ```rust,no_run
/// # use chainsub_core::{Connector, HeadSubscriber, RecordPrinter};
/// # use tokio_util::sync::CancellationToken;
/// # async fn demo<C: Connector>(connector: C) {
/// let cancel = CancellationToken::new();
/// let printer = RecordPrinter::stdout();
/// let mut sub = HeadSubscriber::new(connector, "wss://node", Some(19_000_000), printer);
/// sub.run(&cancel).await;
/// # }
/// ```
pub struct HeadSubscriber<C, S> {
    manager: ConnectionManager<C>,
    scanner: GapScanner,
    reconnect: ReconnectConfig,
    sink: S,
    watermark: Watermark,
    state: StateCell,
}

impl<C, S> HeadSubscriber<C, S>
where
    C: Connector,
    S: EventSink<Header>,
{
    /// `start` is the first height to deliver. `None` means follow from
    /// whatever the head is on first contact, with no backfill.
    pub fn new(connector: C, url: impl Into<String>, start: Option<u64>, sink: S) -> Self {
        Self {
            manager: ConnectionManager::new(connector, url),
            scanner: GapScanner::default(),
            reconnect: ReconnectConfig::default(),
            sink,
            watermark: Watermark::starting_at(start),
            state: StateCell::new("heads"),
        }
    }

    pub fn with_reconnect(mut self, config: ReconnectConfig) -> Self {
        self.reconnect = config;
        self
    }

    pub fn with_scan(mut self, config: ScanConfig) -> Self {
        self.scanner = GapScanner::new(config);
        self
    }

    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    pub fn state(&self) -> SubscriberState {
        self.state.get()
    }

    /// Observe state transitions from another task.
    pub fn watch_state(&self) -> watch::Receiver<SubscriberState> {
        self.state.watch()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Run until `cancel` fires. Every failure short of cancellation ends in
    /// a fixed wait and a fresh connection.
    pub async fn run(&mut self, cancel: &CancellationToken) {
        tracing::info!(
            url = %self.manager.url(),
            watermark = %self.watermark,
            "head subscriber starting"
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
        tracing::info!(last_processed = %self.watermark, "head subscriber stopped");
    }

    /// Reconcile, subscribe, then forward live headers until something ends it.
    async fn session(&mut self, cancel: &CancellationToken, conn: &C::Conn) -> Step {
        self.state.set(SubscriberState::Reconciling);
        if let Err(e) = self.reconcile(cancel, conn).await {
            if e.is_cancelled() {
                return Step::Shutdown;
            }
            tracing::warn!(error = %e, cause = %e.cause(), "could not reconcile with network head");
            return Step::Retry(self.reconnect.head_fetch_retry);
        }
        if cancel.is_cancelled() {
            return Step::Shutdown;
        }

        let mut sub = match conn.subscribe_new_heads().await {
            Ok(sub) => sub,
            Err(source) => {
                let e = SubscriberError::SubscribeFailed { kind: "newHeads", source };
                tracing::warn!(error = %e, cause = %e.cause(), "subscribe failed");
                return Step::Retry(self.reconnect.subscribe_retry);
            }
        };
        tracing::info!("subscribed to new heads");
        self.state.set(SubscriberState::Live);

        let step = self.forward(cancel, &mut sub).await;
        sub.unsubscribe().await;
        step
    }

    /// Fetch the current head and backfill `[watermark + 1, head]`.
    ///
    /// Only a failed head fetch or cancellation is an error. Heights skipped
    /// by the scanner are already logged there.
    async fn reconcile(
        &mut self,
        cancel: &CancellationToken,
        conn: &C::Conn,
    ) -> Result<(), SubscriberError> {
        let head = conn
            .header_at(BlockTag::Latest)
            .await
            .map_err(|source| SubscriberError::FetchFailed {
                what: BlockTag::Latest.to_string(),
                source,
            })?;
        let tip = head.number;

        let from = match self.watermark.next() {
            None => {
                self.watermark.advance_to(tip);
                tracing::info!(head = tip, "no start height, following from current head");
                return Ok(());
            }
            Some(next) if next > tip => {
                tracing::debug!(head = tip, watermark = %self.watermark, "already caught up");
                return Ok(());
            }
            Some(next) => next,
        };

        tracing::info!(from, to = tip, "backfilling missed blocks");
        let Self { scanner, sink, watermark, .. } = self;
        let res = scanner
            .scan(cancel, conn, from, tip, |header| {
                S::deliver(sink, &header);
                watermark.advance_to(header.number);
            })
            .await;
        match res {
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "backfill ended early");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    async fn forward(
        &mut self,
        cancel: &CancellationToken,
        sub: &mut Subscription<Header>,
    ) -> Step {
        loop {
            match sub.next_event(cancel).await {
                SubscriptionEvent::Item(header) => self.on_live(header),
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

    fn on_live(&mut self, header: Header) {
        let height = header.number;
        if self.watermark.covers(height) {
            tracing::debug!(height, watermark = %self.watermark, "duplicate header, skipping");
            return;
        }
        if let Some(expected) = self.watermark.next() {
            if height > expected {
                tracing::warn!(
                    expected,
                    received = height,
                    missed = height - expected,
                    "non-contiguous block, some blocks may have been missed"
                );
            }
        }
        self.sink.deliver(&header);
        self.watermark.advance_to(height);
    }
}
