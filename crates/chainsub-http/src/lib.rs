//! chainsub-http — HTTP JSON-RPC transport for ChainSub.
//!
//! Used for one-shot queries (block lookup, fee estimate, raw transaction
//! submission, `eth_call`). Streaming goes through `chainsub-ws`.

pub mod client;

pub use client::{HttpClientConfig, HttpRpcClient};
