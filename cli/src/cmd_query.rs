//! One-shot HTTP commands: `query`, `count`, `tx`, `deploy`, `increment`.

use std::io::Write;

use alloy_primitives::U256;
use anyhow::{anyhow, bail, Context, Result};
use chainsub_core::types::parse_address;
use chainsub_core::{Block, BlockTag, EthClient, FeeEstimate};
use chainsub_http::HttpRpcClient;

/// `getCount()` selector of the counter contract.
const GET_COUNT_SELECTOR: [u8; 4] = [0xa8, 0x7d, 0x94, 0x2c];

/// Resolve the HTTP endpoint from `--rpc-url` / `INFURA_URL`.
pub fn rpc_url(url: Option<String>) -> Result<String> {
    url.filter(|u| !u.trim().is_empty())
        .ok_or_else(|| anyhow!("INFURA_URL is not set (or pass --rpc-url)"))
}

fn client(url: &str) -> Result<EthClient<HttpRpcClient>> {
    let http = HttpRpcClient::default_for(url).context("creating HTTP client")?;
    Ok(EthClient::new(http))
}

pub async fn query(url: String, block: Option<u64>) -> Result<()> {
    let eth = client(&url)?;
    let tag = block.map_or(BlockTag::Latest, BlockTag::Number);
    let block = eth
        .block_at(tag)
        .await
        .with_context(|| format!("fetching {tag}"))?;

    let mut out = std::io::stdout().lock();
    write_block(&mut out, &block)?;
    Ok(())
}

pub async fn count(url: String, contract: &str) -> Result<()> {
    let address = parse_address(contract)?;
    let eth = client(&url)?;
    let word = eth
        .call(&format!("0x{}", hex::encode(address)), &GET_COUNT_SELECTOR)
        .await
        .context("calling getCount()")?;
    println!("Current count: {}", decode_count(&word)?);
    Ok(())
}

/// Broadcast a pre-signed transaction and print its hash.
pub async fn submit(url: String, label: &str, raw: &str, print_fees: bool) -> Result<()> {
    let signed = decode_hex(raw).context("--raw must be hex-encoded transaction bytes")?;
    if signed.is_empty() {
        bail!("--raw is empty");
    }
    let eth = client(&url)?;

    if print_fees {
        let fees = eth.estimate_fees().await.context("estimating fees")?;
        let mut out = std::io::stdout().lock();
        write_fees(&mut out, &fees)?;
    }

    let hash = eth
        .send_raw_transaction(&signed)
        .await
        .with_context(|| format!("submitting {label} transaction"))?;
    tracing::info!(kind = label, %hash, "transaction submitted");
    println!("{label} transaction sent: {hash}");
    Ok(())
}

// ─── Formatting ──────────────────────────────────────────────────────────────

fn write_block(out: &mut impl Write, block: &Block) -> std::io::Result<()> {
    writeln!(out, "Block number:      {}", block.header.number)?;
    writeln!(out, "Block hash:        {}", block.header.hash)?;
    writeln!(out, "Timestamp:         {}", block.header.timestamp_display())?;
    writeln!(out, "Transaction count: {}", block.tx_count())?;
    writeln!(out, "{}", "-".repeat(48))
}

fn write_fees(out: &mut impl Write, fees: &FeeEstimate) -> std::io::Result<()> {
    writeln!(out, "Base fee:          {} wei", fees.base_fee)?;
    writeln!(out, "Priority fee:      {} wei", fees.max_priority_fee)?;
    writeln!(out, "Max fee:           {} wei", fees.max_fee)
}

fn decode_hex(raw: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let raw = raw.trim();
    hex::decode(raw.strip_prefix("0x").unwrap_or(raw))
}

/// The single `uint256` word returned by `getCount()`.
fn decode_count(word: &[u8]) -> Result<U256> {
    if word.len() != 32 {
        bail!("getCount() returned {} bytes, expected 32", word.len());
    }
    U256::try_from_be_slice(word).ok_or_else(|| anyhow!("getCount() result does not fit in uint256"))
}
