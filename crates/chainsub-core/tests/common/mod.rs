//! Scripted in-memory node shared by the subscriber integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chainsub_core::policy::RetryConfig;
use chainsub_core::{
    BlockTag, Connection, Connector, Header, Log, LogFilter, ReconnectConfig, ScanConfig,
    Subscription, SubscriptionHandle, TransportError,
};
use tokio::sync::{mpsc, oneshot, watch};

// ─── Script ───────────────────────────────────────────────────────────────────

struct Feed<T> {
    items: Option<mpsc::UnboundedSender<T>>,
    error: Option<oneshot::Sender<TransportError>>,
}

impl<T> Feed<T> {
    fn new() -> (Self, mpsc::UnboundedReceiver<T>, oneshot::Receiver<TransportError>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (err_tx, err_rx) = oneshot::channel();
        let feed = Self { items: Some(tx), error: Some(err_tx) };
        (feed, rx, err_rx)
    }
}

#[derive(Default)]
struct Script {
    head: u64,
    /// Remaining failures per height; `u32::MAX` never recovers.
    fetch_failures: HashMap<u64, u32>,
    latest_failures: u32,
    dial_failures: u32,
    subscribe_failures: u32,

    dials: u32,
    closes: u32,
    unsubscribes: u32,
    fetched: Vec<u64>,
    log_filters: Vec<LogFilter>,

    head_feeds: Vec<Feed<Header>>,
    log_feeds: Vec<Feed<Log>>,
}

/// A node whose behaviour is scripted by the test and whose side effects
/// are recorded for assertions. Clones share state.
#[derive(Clone)]
pub struct MockNode {
    script: Arc<Mutex<Script>>,
    subscriptions: Arc<watch::Sender<usize>>,
}

impl MockNode {
    pub fn with_head(head: u64) -> Self {
        let (tx, _) = watch::channel(0);
        let script = Script { head, ..Default::default() };
        Self {
            script: Arc::new(Mutex::new(script)),
            subscriptions: Arc::new(tx),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    // ─── Scripting ────────────────────────────────────────────────────────────

    pub fn set_head(&self, head: u64) {
        self.lock().head = head;
    }

    pub fn fail_fetch(&self, height: u64, times: u32) {
        self.lock().fetch_failures.insert(height, times);
    }

    pub fn fail_latest(&self, times: u32) {
        self.lock().latest_failures = times;
    }

    pub fn fail_dials(&self, times: u32) {
        self.lock().dial_failures = times;
    }

    pub fn fail_subscribes(&self, times: u32) {
        self.lock().subscribe_failures = times;
    }

    /// Deliver a header on the most recent `newHeads` subscription.
    pub fn push_head(&self, number: u64) {
        let s = self.lock();
        let feed = s.head_feeds.last().expect("no head subscription");
        if let Some(tx) = &feed.items {
            let _ = tx.send(header(number));
        }
    }

    /// Deliver a log on the most recent `logs` subscription.
    pub fn push_log(&self, log: Log) {
        let s = self.lock();
        let feed = s.log_feeds.last().expect("no log subscription");
        if let Some(tx) = &feed.items {
            let _ = tx.send(log);
        }
    }

    /// Fire the error signal of the most recent subscription of either kind.
    pub fn fail_subscription(&self, err: TransportError) {
        let mut s = self.lock();
        let signal = if s.log_feeds.is_empty() {
            s.head_feeds.last_mut().and_then(|f| f.error.take())
        } else {
            s.log_feeds.last_mut().and_then(|f| f.error.take())
        };
        if let Some(tx) = signal {
            let _ = tx.send(err);
        }
    }

    /// Drop the item sender of the most recent subscription without an error.
    pub fn close_subscription(&self) {
        let mut s = self.lock();
        if let Some(feed) = s.head_feeds.last_mut() {
            feed.items = None;
        }
        if let Some(feed) = s.log_feeds.last_mut() {
            feed.items = None;
        }
    }

    // ─── Observations ─────────────────────────────────────────────────────────

    pub fn dials(&self) -> u32 {
        self.lock().dials
    }

    pub fn closes(&self) -> u32 {
        self.lock().closes
    }

    pub fn unsubscribes(&self) -> u32 {
        self.lock().unsubscribes
    }

    pub fn fetch_count(&self, height: u64) -> usize {
        self.lock().fetched.iter().filter(|&&h| h == height).count()
    }

    pub fn fetched(&self) -> Vec<u64> {
        self.lock().fetched.clone()
    }

    pub fn log_filters(&self) -> Vec<LogFilter> {
        self.lock().log_filters.clone()
    }

    /// Wait until at least `n` subscriptions have been established.
    pub async fn wait_for_subscriptions(&self, n: usize) {
        let mut rx = self.subscriptions.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|c| *c >= n))
            .await
            .expect("timed out waiting for subscription")
            .expect("subscription counter dropped");
    }

    fn subscribed(&self) {
        self.subscriptions.send_modify(|c| *c += 1);
    }
}

#[async_trait]
impl Connector for MockNode {
    type Conn = MockConn;

    async fn dial(&self, _url: &str) -> Result<MockConn, TransportError> {
        let mut s = self.lock();
        s.dials += 1;
        if s.dial_failures > 0 {
            s.dial_failures -= 1;
            return Err(TransportError::WebSocket("connection refused".into()));
        }
        Ok(MockConn { node: self.clone() })
    }
}

pub struct MockConn {
    node: MockNode,
}

#[async_trait]
impl Connection for MockConn {
    async fn header_at(&self, tag: BlockTag) -> Result<Header, TransportError> {
        let mut s = self.node.lock();
        match tag {
            BlockTag::Latest => {
                if s.latest_failures > 0 {
                    s.latest_failures -= 1;
                    return Err(TransportError::Timeout { ms: 1 });
                }
                Ok(header(s.head))
            }
            BlockTag::Number(n) => {
                s.fetched.push(n);
                if let Some(left) = s.fetch_failures.get_mut(&n) {
                    if *left > 0 {
                        *left = left.saturating_sub(1);
                        return Err(TransportError::Timeout { ms: 1 });
                    }
                }
                Ok(header(n))
            }
        }
    }

    async fn subscribe_new_heads(&self) -> Result<Subscription<Header>, TransportError> {
        let rx = {
            let mut s = self.node.lock();
            if s.subscribe_failures > 0 {
                s.subscribe_failures -= 1;
                return Err(TransportError::Other("subscribe rejected".into()));
            }
            let (feed, rx, err_rx) = Feed::new();
            s.head_feeds.push(feed);
            (rx, err_rx)
        };
        self.node.subscribed();
        Ok(Subscription::new(rx.0, Box::new(self.handle(rx.1))))
    }

    async fn subscribe_logs(&self, filter: &LogFilter) -> Result<Subscription<Log>, TransportError> {
        let rx = {
            let mut s = self.node.lock();
            s.log_filters.push(filter.clone());
            if s.subscribe_failures > 0 {
                s.subscribe_failures -= 1;
                return Err(TransportError::Other("subscribe rejected".into()));
            }
            let (feed, rx, err_rx) = Feed::new();
            s.log_feeds.push(feed);
            (rx, err_rx)
        };
        self.node.subscribed();
        Ok(Subscription::new(rx.0, Box::new(self.handle(rx.1))))
    }

    async fn close(&self) {
        self.node.lock().closes += 1;
    }
}

impl MockConn {
    fn handle(&self, err: oneshot::Receiver<TransportError>) -> MockHandle {
        MockHandle { err: Some(err), node: self.node.clone() }
    }
}

struct MockHandle {
    err: Option<oneshot::Receiver<TransportError>>,
    node: MockNode,
}

#[async_trait]
impl SubscriptionHandle for MockHandle {
    async fn error_signal(&mut self) -> TransportError {
        match self.err.as_mut() {
            Some(rx) => match rx.await {
                Ok(err) => {
                    self.err = None;
                    err
                }
                // Sender dropped without firing: no error will ever come.
                Err(_) => {
                    self.err = None;
                    std::future::pending().await
                }
            },
            None => std::future::pending().await,
        }
    }

    async fn unsubscribe(&mut self) {
        self.err = None;
        self.node.lock().unsubscribes += 1;
    }
}

// ─── Fixtures ─────────────────────────────────────────────────────────────────

pub fn header(number: u64) -> Header {
    Header {
        number,
        hash: format!("0x{number:064x}"),
        parent_hash: format!("0x{:064x}", number.saturating_sub(1)),
        timestamp: 1_700_000_000 + number * 12,
        nonce: 0,
        base_fee: Some(1_000_000_000),
    }
}

pub fn log(block_number: u64, log_index: u64) -> Log {
    Log {
        block_number,
        tx_hash: format!("0x{block_number:062x}{log_index:02x}"),
        log_index,
        address: "0x5fbdb2315678afecb367f032d93f642f64180aa3".into(),
        topics: vec!["0x".to_string() + &"ab".repeat(32)],
        data: vec![0, 0, 0, 1],
        removed: false,
    }
}

pub fn fast_reconnect() -> ReconnectConfig {
    let ms = Duration::from_millis(1);
    ReconnectConfig {
        dial_retry: ms,
        head_fetch_retry: ms,
        subscribe_retry: ms,
        subscription_error: ms,
        channel_closed: ms,
    }
}

pub fn fast_scan() -> ScanConfig {
    ScanConfig { retry: RetryConfig::fixed(3, Duration::from_millis(1)) }
}

/// Shared record of everything a sink received.
pub type Seen<T> = Arc<Mutex<Vec<T>>>;

/// Poll `cond` until it holds, failing the test after five seconds.
pub async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
