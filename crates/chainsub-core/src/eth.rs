//! Typed Ethereum JSON-RPC calls on top of any [`RpcTransport`].
//!
//! Each `EthClient` is constructed explicitly and owned by its caller; there
//! is no process-wide client.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Value};

use crate::error::TransportError;
use crate::transport::RpcTransport;
use crate::types::{parse_hex_u128, Block, BlockTag, FeeEstimate, Header};

/// Stateless request/response client for the handful of calls the CLI and
/// the streaming connections need.
pub struct EthClient<T> {
    transport: T,
    next_id: AtomicU64,
}

impl<T: RpcTransport> EthClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
        }
    }

    /// The wrapped transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// `eth_getBlockByNumber(tag, false)` reduced to its header fields.
    pub async fn header_at(&self, tag: BlockTag) -> Result<Header, TransportError> {
        let v = self.raw_block(tag).await?;
        Header::from_json(&v).ok_or_else(|| malformed("header", tag))
    }

    /// `eth_getBlockByNumber(n, false)` with transaction hashes.
    pub async fn block_at(&self, tag: BlockTag) -> Result<Block, TransportError> {
        let v = self.raw_block(tag).await?;
        Block::from_json(&v).ok_or_else(|| malformed("block", tag))
    }

    /// `eth_sendRawTransaction`: submit an already signed transaction.
    /// Returns the transaction hash.
    pub async fn send_raw_transaction(&self, signed: &[u8]) -> Result<String, TransportError> {
        let payload = format!("0x{}", hex::encode(signed));
        self.transport
            .call(self.id(), "eth_sendRawTransaction", vec![json!(payload)])
            .await
    }

    /// `eth_call` against the latest block. Returns the raw return data.
    pub async fn call(&self, to: &str, data: &[u8]) -> Result<Vec<u8>, TransportError> {
        let tx = json!({ "to": to, "data": format!("0x{}", hex::encode(data)) });
        let out: String = self
            .transport
            .call(self.id(), "eth_call", vec![tx, json!("latest")])
            .await?;
        hex::decode(out.strip_prefix("0x").unwrap_or(&out))
            .map_err(|e| TransportError::Deserialization(format!("eth_call result: {e}")))
    }

    /// Base fee of the latest block plus the node's suggested priority fee.
    pub async fn estimate_fees(&self) -> Result<FeeEstimate, TransportError> {
        let tip: String = self
            .transport
            .call(self.id(), "eth_maxPriorityFeePerGas", vec![])
            .await?;
        let tip = parse_hex_u128(&tip).ok_or_else(|| {
            TransportError::Deserialization(format!("eth_maxPriorityFeePerGas: {tip}"))
        })?;
        let latest = self.header_at(BlockTag::Latest).await?;
        Ok(FeeEstimate::new(latest.base_fee.unwrap_or(0), tip))
    }

    async fn raw_block(&self, tag: BlockTag) -> Result<Value, TransportError> {
        let v: Value = self
            .transport
            .call(self.id(), "eth_getBlockByNumber", vec![tag.to_param(), json!(false)])
            .await?;
        if v.is_null() {
            return Err(TransportError::NotFound { what: tag.to_string() });
        }
        Ok(v)
    }
}

fn malformed(what: &str, tag: BlockTag) -> TransportError {
    TransportError::Deserialization(format!("malformed {what} for {tag}"))
}
