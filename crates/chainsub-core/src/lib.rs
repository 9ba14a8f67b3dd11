//! chainsub-core — resilient block and log subscriptions for ChainSub.
//!
//! # Overview
//!
//! ```text
//! HeadSubscriber / LogSubscriber   (one sequential control loop each)
//!        ├── ConnectionManager     (dial + close, cancellable)
//!        ├── GapScanner            (bounded backfill, per-height retry)
//!        └── EventSink             (printer, storage, forwarding …)
//! ```
//!
//! The core crate defines:
//!
//! - [`Connector`] / [`Connection`] / [`SubscriptionHandle`]: the streaming
//!   collaborator every transport implements
//! - [`RpcTransport`] + [`EthClient`]: the one-shot query collaborator
//! - [`GapScanner`]: replays a closed range of block heights
//! - [`HeadSubscriber`] / [`LogSubscriber`]: reconnecting live loops
//! - [`SubscriberError`] / [`TransportError`]: structured error types

pub mod connection;
pub mod error;
pub mod eth;
pub mod policy;
pub mod request;
pub mod scanner;
pub mod sink;
pub mod subscriber;
pub mod transport;
pub mod types;

pub use connection::{
    Connection, ConnectionManager, Connector, Subscription, SubscriptionEvent, SubscriptionHandle,
};
pub use error::{SubscriberError, TransportError};
pub use eth::EthClient;
pub use request::{JsonRpcRequest, JsonRpcResponse, RpcId, RpcParam};
pub use scanner::{GapScanner, ScanConfig};
pub use sink::{EventSink, RecordPrinter};
pub use subscriber::{
    HeadSubscriber, LogSubscriber, ReconnectConfig, SubscriberState, Watermark,
};
pub use transport::{HealthStatus, RpcTransport};
pub use types::{Block, BlockTag, FeeEstimate, Header, Log, LogFilter};
