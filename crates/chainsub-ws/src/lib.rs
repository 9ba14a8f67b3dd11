//! chainsub-ws — WebSocket connector for ChainSub subscribers.
//!
//! # Features
//! - One background task per socket, multiplexing requests and `eth_subscribe`
//! - Typed `newHeads` / `logs` item channels
//! - Error signal fan-out to every subscription when the socket fails
//! - No internal reconnect; the subscriber loops redial

pub mod client;
pub mod subscriptions;

pub use client::{WsClientConfig, WsConnection, WsConnector, WsTransport};
pub use subscriptions::{SubscriptionEntry, SubscriptionId, SubscriptionManager};
