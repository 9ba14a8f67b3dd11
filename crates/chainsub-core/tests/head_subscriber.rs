//! End-to-end behaviour of `HeadSubscriber` against a scripted node.
//!
//! Every test runs the subscriber on its own task with millisecond
//! reconnect delays and stops it through the cancellation token.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chainsub_core::policy::RetryConfig;
use chainsub_core::{
    HeadSubscriber, Header, ReconnectConfig, ScanConfig, SubscriberState, TransportError,
};
use common::{eventually, fast_reconnect, fast_scan, MockNode, Seen};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type Sink = Box<dyn FnMut(&Header) + Send>;
type Sub = HeadSubscriber<MockNode, Sink>;

// ─── Helpers ──────────────────────────────────────────────────────────────────

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<Sub>,
}

impl Running {
    async fn stop(self) -> Sub {
        self.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("subscriber did not stop after cancellation")
            .expect("subscriber task panicked")
    }
}

fn subscriber(node: &MockNode, start: Option<u64>) -> (Sub, Seen<u64>) {
    let seen: Seen<u64> = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = seen.clone();
    let sink: Sink = Box::new(move |h: &Header| sink_seen.lock().unwrap().push(h.number));
    let sub = HeadSubscriber::new(node.clone(), "ws://mock", start, sink)
        .with_reconnect(fast_reconnect())
        .with_scan(fast_scan());
    (sub, seen)
}

fn spawn(mut sub: Sub) -> Running {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        sub.run(&token).await;
        sub
    });
    Running { cancel, task }
}

fn seen_now(seen: &Seen<u64>) -> Vec<u64> {
    seen.lock().unwrap().clone()
}

// ─── Reconciliation ───────────────────────────────────────────────────────────

#[tokio::test]
async fn first_run_follows_current_head_without_backfill() {
    let node = MockNode::with_head(1000);
    let (sub, seen) = subscriber(&node, None);
    let run = spawn(sub);

    node.wait_for_subscriptions(1).await;
    assert!(node.fetched().is_empty(), "no numbered fetches on first run");

    node.push_head(1000);
    node.push_head(1001);
    eventually("live header 1001", || seen_now(&seen).contains(&1001)).await;

    let sub = run.stop().await;
    assert_eq!(seen_now(&seen), vec![1001]);
    assert_eq!(sub.watermark().last_processed(), Some(1001));
}

#[tokio::test]
async fn explicit_start_backfills_up_to_head() {
    let node = MockNode::with_head(55);
    let (sub, seen) = subscriber(&node, Some(51));
    let run = spawn(sub);

    node.wait_for_subscriptions(1).await;
    assert_eq!(seen_now(&seen), vec![51, 52, 53, 54, 55]);

    node.push_head(56);
    eventually("live header 56", || seen_now(&seen).len() == 6).await;

    let sub = run.stop().await;
    assert_eq!(seen_now(&seen), vec![51, 52, 53, 54, 55, 56]);
    assert_eq!(sub.watermark().last_processed(), Some(56));
}

#[tokio::test]
async fn start_at_genesis_includes_block_zero() {
    let node = MockNode::with_head(3);
    let (sub, seen) = subscriber(&node, Some(0));
    let run = spawn(sub);

    node.wait_for_subscriptions(1).await;
    run.stop().await;
    assert_eq!(seen_now(&seen), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn unreachable_height_is_skipped() {
    let node = MockNode::with_head(55);
    node.fail_fetch(53, u32::MAX);
    let (sub, seen) = subscriber(&node, Some(51));
    let run = spawn(sub);

    node.wait_for_subscriptions(1).await;
    let sub = run.stop().await;

    assert_eq!(seen_now(&seen), vec![51, 52, 54, 55]);
    assert_eq!(node.fetch_count(53), 3);
    assert_eq!(sub.watermark().last_processed(), Some(55));
}

#[tokio::test]
async fn start_above_head_waits_for_live_headers() {
    let node = MockNode::with_head(100);
    let (sub, seen) = subscriber(&node, Some(101));
    let run = spawn(sub);

    node.wait_for_subscriptions(1).await;
    assert!(node.fetched().is_empty());

    node.push_head(101);
    eventually("live header 101", || seen_now(&seen) == vec![101]).await;
    run.stop().await;
}

// ─── Live stream ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn headers_at_or_below_watermark_are_dropped() {
    let node = MockNode::with_head(100);
    let (sub, seen) = subscriber(&node, Some(101));
    let run = spawn(sub);

    node.wait_for_subscriptions(1).await;
    node.push_head(95);
    node.push_head(101);
    node.push_head(100);
    node.push_head(101);
    node.push_head(102);
    eventually("live header 102", || seen_now(&seen).contains(&102)).await;

    let sub = run.stop().await;
    assert_eq!(seen_now(&seen), vec![101, 102]);
    assert_eq!(sub.watermark().last_processed(), Some(102));
}

#[tokio::test]
async fn non_contiguous_header_is_still_delivered() {
    let node = MockNode::with_head(55);
    let (sub, seen) = subscriber(&node, Some(56));
    let run = spawn(sub);

    node.wait_for_subscriptions(1).await;
    node.push_head(60);
    node.push_head(61);
    eventually("live header 61", || seen_now(&seen).contains(&61)).await;

    let sub = run.stop().await;
    assert_eq!(seen_now(&seen), vec![60, 61]);
    assert_eq!(sub.watermark().last_processed(), Some(61));
    assert!(node.fetched().is_empty(), "live gaps are not backfilled");
}

// ─── Reconnect ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn error_signal_reconnects_and_backfills_the_gap() {
    let node = MockNode::with_head(100);
    let (sub, seen) = subscriber(&node, Some(101));
    let run = spawn(sub);

    node.wait_for_subscriptions(1).await;
    node.push_head(101);
    node.push_head(102);
    eventually("live header 102", || seen_now(&seen).len() == 2).await;

    node.set_head(105);
    node.fail_subscription(TransportError::WebSocket("connection reset".into()));
    node.wait_for_subscriptions(2).await;
    assert_eq!(seen_now(&seen), vec![101, 102, 103, 104, 105]);

    node.push_head(106);
    eventually("live header 106", || seen_now(&seen).contains(&106)).await;

    let sub = run.stop().await;
    assert_eq!(seen_now(&seen), vec![101, 102, 103, 104, 105, 106]);
    assert_eq!(sub.watermark().last_processed(), Some(106));
    assert_eq!(node.dials(), 2);
    assert_eq!(node.unsubscribes(), 2);
    assert_eq!(node.closes(), 2);
}

#[tokio::test]
async fn closed_channel_reconnects() {
    let node = MockNode::with_head(10);
    let (sub, seen) = subscriber(&node, None);
    let run = spawn(sub);

    node.wait_for_subscriptions(1).await;
    node.set_head(12);
    node.close_subscription();
    node.wait_for_subscriptions(2).await;

    run.stop().await;
    assert_eq!(seen_now(&seen), vec![11, 12]);
    assert_eq!(node.dials(), 2);
}

#[tokio::test]
async fn failed_dials_are_retried() {
    let node = MockNode::with_head(10);
    node.fail_dials(2);
    let (sub, _seen) = subscriber(&node, None);
    let run = spawn(sub);

    node.wait_for_subscriptions(1).await;
    run.stop().await;
    assert_eq!(node.dials(), 3);
    assert_eq!(node.closes(), 1, "failed dials leave nothing to close");
}

#[tokio::test]
async fn failed_head_fetch_drops_the_connection() {
    let node = MockNode::with_head(10);
    node.fail_latest(1);
    let (sub, _seen) = subscriber(&node, None);
    let run = spawn(sub);

    node.wait_for_subscriptions(1).await;
    let sub = run.stop().await;
    assert_eq!(node.dials(), 2);
    assert_eq!(node.closes(), 2);
    assert_eq!(sub.watermark().last_processed(), Some(10));
}

#[tokio::test]
async fn failed_subscribe_is_retried_on_a_new_connection() {
    let node = MockNode::with_head(10);
    node.fail_subscribes(1);
    let (sub, _seen) = subscriber(&node, None);
    let run = spawn(sub);

    node.wait_for_subscriptions(1).await;
    run.stop().await;
    assert_eq!(node.dials(), 2);
}

// ─── Cancellation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancellation_in_live_unsubscribes_and_closes() {
    let node = MockNode::with_head(10);
    let (sub, _seen) = subscriber(&node, None);
    let mut states = sub.watch_state();
    let run = spawn(sub);

    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == SubscriberState::Live),
    )
    .await
    .expect("never went live")
    .expect("state channel closed");

    let sub = run.stop().await;
    assert_eq!(sub.state(), SubscriberState::Shutdown);
    assert_eq!(node.unsubscribes(), 1);
    assert_eq!(node.closes(), 1);
}

#[tokio::test]
async fn cancellation_interrupts_dial_backoff() {
    let node = MockNode::with_head(10);
    node.fail_dials(u32::MAX);
    let (sub, _seen) = subscriber(&node, None);
    let sub = sub.with_reconnect(ReconnectConfig {
        dial_retry: Duration::from_secs(60),
        ..fast_reconnect()
    });
    let run = spawn(sub);

    eventually("first dial", || node.dials() >= 1).await;
    let started = std::time::Instant::now();
    let sub = run.stop().await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(sub.state(), SubscriberState::Shutdown);
    assert_eq!(node.dials(), 1);
}

#[tokio::test]
async fn cancellation_interrupts_head_fetch_backoff() {
    let node = MockNode::with_head(10);
    node.fail_latest(u32::MAX);
    let (sub, _seen) = subscriber(&node, None);
    let sub = sub.with_reconnect(ReconnectConfig {
        head_fetch_retry: Duration::from_secs(60),
        ..fast_reconnect()
    });
    let run = spawn(sub);

    eventually("first connection dropped", || node.closes() >= 1).await;
    let started = std::time::Instant::now();
    let sub = run.stop().await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(sub.state(), SubscriberState::Shutdown);
    assert_eq!(node.dials(), 1);
    assert_eq!(node.closes(), node.dials());
    assert_eq!(sub.watermark().last_processed(), None);
}

#[tokio::test]
async fn cancellation_interrupts_subscribe_backoff() {
    let node = MockNode::with_head(10);
    node.fail_subscribes(u32::MAX);
    let (sub, _seen) = subscriber(&node, None);
    let sub = sub.with_reconnect(ReconnectConfig {
        subscribe_retry: Duration::from_secs(60),
        ..fast_reconnect()
    });
    let run = spawn(sub);

    eventually("first connection dropped", || node.closes() >= 1).await;
    let started = std::time::Instant::now();
    let sub = run.stop().await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(sub.state(), SubscriberState::Shutdown);
    assert_eq!(node.dials(), 1);
    assert_eq!(node.closes(), node.dials());
    assert_eq!(node.unsubscribes(), 0);
}

#[tokio::test]
async fn cancellation_interrupts_backfill() {
    let node = MockNode::with_head(100);
    node.fail_fetch(3, u32::MAX);
    let (sub, seen) = subscriber(&node, Some(1));
    let sub = sub.with_scan(ScanConfig {
        retry: RetryConfig::fixed(3, Duration::from_secs(60)),
    });
    let run = spawn(sub);

    eventually("stuck on height 3", || node.fetch_count(3) >= 1).await;
    let sub = run.stop().await;

    assert_eq!(seen_now(&seen), vec![1, 2]);
    assert_eq!(sub.watermark().last_processed(), Some(2));
    assert_eq!(node.closes(), 1);
    assert_eq!(node.unsubscribes(), 0, "never reached the subscribe step");
}
