//! Records delivered by the subscribers and returned by the query client.

use std::str::FromStr;

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::SubscriberError;

// ─── BlockTag ────────────────────────────────────────────────────────────────

/// Which block a header lookup refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    /// The most recent block known to the node.
    Latest,
    /// A specific height.
    Number(u64),
}

impl BlockTag {
    /// The JSON-RPC parameter form (`"latest"` or `"0x…"`).
    pub fn to_param(self) -> Value {
        match self {
            Self::Latest => json!("latest"),
            Self::Number(n) => json!(format!("0x{n:x}")),
        }
    }
}

impl std::fmt::Display for BlockTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Latest => write!(f, "latest block"),
            Self::Number(n) => write!(f, "block {n}"),
        }
    }
}

impl From<u64> for BlockTag {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

// ─── Header ──────────────────────────────────────────────────────────────────

/// A block header as delivered by `newHeads` or `eth_getBlockByNumber`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Block height.
    pub number: u64,
    /// Block hash (`0x…`).
    pub hash: String,
    /// Parent block hash (`0x…`).
    pub parent_hash: String,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    /// Proof-of-work nonce; zero on proof-of-stake chains.
    pub nonce: u64,
    /// EIP-1559 base fee in wei, absent on pre-London blocks.
    pub base_fee: Option<u128>,
}

impl Header {
    /// Parse the node's JSON header object. Returns `None` if a required field
    /// is missing or malformed.
    pub fn from_json(v: &Value) -> Option<Self> {
        Some(Self {
            number: parse_hex_u64(v.get("number")?.as_str()?)?,
            hash: v.get("hash")?.as_str()?.to_string(),
            parent_hash: v.get("parentHash")?.as_str()?.to_string(),
            timestamp: parse_hex_u64(v.get("timestamp")?.as_str()?)?,
            nonce: v
                .get("nonce")
                .and_then(Value::as_str)
                .and_then(parse_hex_u64)
                .unwrap_or(0),
            base_fee: v
                .get("baseFeePerGas")
                .and_then(Value::as_str)
                .and_then(parse_hex_u128),
        })
    }

    /// Block time as UTC, if the timestamp is representable.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::try_from(self.timestamp).ok()?, 0)
    }

    /// `"<unix seconds> (<UTC time>)"` for display.
    pub fn timestamp_display(&self) -> String {
        match self.time() {
            Some(t) => format!("{} ({})", self.timestamp, t.format("%Y-%m-%d %H:%M:%S UTC")),
            None => self.timestamp.to_string(),
        }
    }
}

// ─── Block ───────────────────────────────────────────────────────────────────

/// A block with its transaction hashes (no transaction bodies).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<String>,
}

impl Block {
    pub fn from_json(v: &Value) -> Option<Self> {
        let header = Header::from_json(v)?;
        let transactions = v
            .get("transactions")
            .and_then(Value::as_array)
            .map(|txs| {
                txs.iter()
                    .filter_map(|tx| match tx {
                        Value::String(hash) => Some(hash.clone()),
                        other => other.get("hash").and_then(Value::as_str).map(String::from),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Some(Self { header, transactions })
    }

    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }
}

// ─── Log ─────────────────────────────────────────────────────────────────────

/// A contract event log as delivered by a `logs` subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub block_number: u64,
    pub tx_hash: String,
    /// Index of the log within its block.
    pub log_index: u64,
    /// Emitting contract address.
    pub address: String,
    /// Indexed topics; `topics[0]` is the event signature hash.
    pub topics: Vec<String>,
    /// Raw non-indexed payload.
    pub data: Vec<u8>,
    /// Set when a reorg retracted this log.
    pub removed: bool,
}

impl Log {
    pub fn from_json(v: &Value) -> Option<Self> {
        let data_hex = v.get("data").and_then(Value::as_str).unwrap_or("0x");
        Some(Self {
            block_number: parse_hex_u64(v.get("blockNumber")?.as_str()?)?,
            tx_hash: v.get("transactionHash")?.as_str()?.to_string(),
            log_index: parse_hex_u64(v.get("logIndex")?.as_str()?)?,
            address: v.get("address")?.as_str()?.to_string(),
            topics: v
                .get("topics")?
                .as_array()?
                .iter()
                .filter_map(|t| t.as_str().map(String::from))
                .collect(),
            data: hex::decode(data_hex.strip_prefix("0x").unwrap_or(data_hex)).ok()?,
            removed: v.get("removed").and_then(Value::as_bool).unwrap_or(false),
        })
    }
}

// ─── LogFilter ───────────────────────────────────────────────────────────────

/// Address filter for a `logs` subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    /// Only deliver logs from these contract addresses (empty = all addresses).
    pub addresses: Vec<String>,
}

impl LogFilter {
    /// Filter matching every contract.
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter for a single contract address (`0x` plus 40 hex digits).
    pub fn address(addr: &str) -> Result<Self, SubscriberError> {
        Self::addresses([addr])
    }

    /// Filter for several contract addresses.
    pub fn addresses<'a>(addrs: impl IntoIterator<Item = &'a str>) -> Result<Self, SubscriberError> {
        let addresses = addrs
            .into_iter()
            .map(|a| parse_address(a).map(|addr| format!("0x{}", hex::encode(addr))))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { addresses })
    }

    /// Returns `true` if this filter matches every address.
    pub fn is_match_all(&self) -> bool {
        self.addresses.is_empty()
    }

    /// The `eth_subscribe("logs", …)` filter object.
    pub fn to_param(&self) -> Value {
        if self.addresses.is_empty() {
            json!({})
        } else {
            json!({ "address": self.addresses })
        }
    }
}

// ─── FeeEstimate ─────────────────────────────────────────────────────────────

/// EIP-1559 fee suggestion, all values in wei.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub base_fee: u128,
    pub max_priority_fee: u128,
    /// `2 * base_fee + max_priority_fee`.
    pub max_fee: u128,
}

impl FeeEstimate {
    pub fn new(base_fee: u128, max_priority_fee: u128) -> Self {
        Self {
            base_fee,
            max_priority_fee,
            max_fee: base_fee.saturating_mul(2).saturating_add(max_priority_fee),
        }
    }
}

// ─── Hex helpers ─────────────────────────────────────────────────────────────

/// Parse a hex quantity (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(s, 16).ok()
}

/// Parse a hex quantity (with or without `0x`) to u128.
pub fn parse_hex_u128(s: &str) -> Option<u128> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Some(0);
    }
    u128::from_str_radix(s, 16).ok()
}

/// Parse a `0x`-prefixed contract address. Checksum casing is not enforced.
pub fn parse_address(s: &str) -> Result<Address, SubscriberError> {
    if !s.starts_with("0x") {
        return Err(SubscriberError::InvalidAddress(s.to_string()));
    }
    Address::from_str(s).map_err(|_| SubscriberError::InvalidAddress(s.to_string()))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
