//! Streaming commands: `subscribe` and `subscribe-logs`.
//!
//! Both run until SIGINT or SIGTERM, then unsubscribe and close cleanly.

use anyhow::{anyhow, bail, Result};
use chainsub_core::{HeadSubscriber, LogFilter, LogSubscriber, RecordPrinter};
use chainsub_ws::WsConnector;
use tokio_util::sync::CancellationToken;

/// Resolve the WebSocket endpoint from `--ws-url` / `INFURA_WS_URL`.
pub fn ws_url(url: Option<String>) -> Result<String> {
    let url = url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| anyhow!("INFURA_WS_URL is required for streaming commands"))?;
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        bail!("INFURA_WS_URL must start with ws:// or wss://, got {url}");
    }
    Ok(url)
}

pub async fn heads(url: String, start: Option<u64>) -> Result<()> {
    let cancel = shutdown_token();
    let mut sub = HeadSubscriber::new(WsConnector::default(), url, start, RecordPrinter::stdout());
    sub.run(&cancel).await;
    tracing::info!(watermark = %sub.watermark(), "head subscriber stopped");
    Ok(())
}

pub async fn logs(url: String, contract: Option<&str>) -> Result<()> {
    let filter = match contract {
        Some(addr) => LogFilter::address(addr)?,
        None => LogFilter::all(),
    };
    let cancel = shutdown_token();
    let mut sub = LogSubscriber::new(WsConnector::default(), url, filter, RecordPrinter::stdout());
    sub.run(&cancel).await;
    tracing::info!(delivered = sub.delivered(), "log subscriber stopped");
    Ok(())
}

// ─── Shutdown ────────────────────────────────────────────────────────────────

/// A token cancelled on the first termination signal.
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        let signal = wait_for_signal().await;
        tracing::info!(signal, "shutdown requested");
        trigger.cancel();
    });
    cancel
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => tokio::select! {
            _ = ctrl_c() => "SIGINT",
            _ = term.recv() => "SIGTERM",
        },
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGTERM");
            ctrl_c().await;
            "SIGINT"
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c().await;
    "ctrl-c"
}
