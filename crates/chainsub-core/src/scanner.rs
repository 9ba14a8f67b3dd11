//! Gap scanner: replays a closed range of block heights.
//!
//! Failures are isolated per height: a height that cannot be fetched after
//! every attempt is logged and skipped so the rest of the range still makes
//! progress. This is best effort, not a completeness guarantee.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::connection::{sleep_or_cancel, Connection};
use crate::error::SubscriberError;
use crate::policy::{RetryConfig, RetryPolicy};
use crate::types::{BlockTag, Header};

/// Per-height fetch policy for a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    pub retry: RetryConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::fixed(3, Duration::from_secs(1)),
        }
    }
}

/// Fetches every header in `[start, end]` and hands each one to a callback.
#[derive(Debug, Clone)]
pub struct GapScanner {
    retry: RetryPolicy,
}

impl Default for GapScanner {
    fn default() -> Self {
        Self::new(ScanConfig::default())
    }
}

impl GapScanner {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            retry: RetryPolicy::new(config.retry),
        }
    }

    /// Scan `[start, end]` (both inclusive) in increasing order.
    ///
    /// `on_item` runs synchronously for each fetched header before the next
    /// height is requested, so a caller tracking a watermark inside it stays
    /// consistent with what was actually delivered even if the scan is
    /// cancelled halfway. An empty range (`start > end`) is a no-op.
    ///
    /// Returns `Err(Cancelled)` as soon as the token fires; nothing else is
    /// an error.
    pub async fn scan<C, F>(
        &self,
        cancel: &CancellationToken,
        conn: &C,
        start: u64,
        end: u64,
        mut on_item: F,
    ) -> Result<(), SubscriberError>
    where
        C: Connection + ?Sized,
        F: FnMut(Header) + Send,
    {
        if start > end {
            return Ok(());
        }
        tracing::info!(start, end, "scanning blocks");

        let mut skipped = 0u64;
        for height in start..=end {
            if cancel.is_cancelled() {
                return Err(SubscriberError::Cancelled);
            }
            match self.fetch(cancel, conn, height).await? {
                Some(header) => on_item(header),
                None => skipped += 1,
            }
        }

        tracing::info!(start, end, skipped, "scan complete");
        Ok(())
    }

    /// Fetch one height with bounded retry. `Ok(None)` means give up and skip.
    async fn fetch<C>(
        &self,
        cancel: &CancellationToken,
        conn: &C,
        height: u64,
    ) -> Result<Option<Header>, SubscriberError>
    where
        C: Connection + ?Sized,
    {
        let max = self.retry.max_attempts();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let err = match conn.header_at(BlockTag::Number(height)).await {
                Ok(header) => return Ok(Some(header)),
                Err(e) => e,
            };
            tracing::warn!(height, attempt, max, error = %err, "failed to fetch block");

            match self.retry.next_delay(attempt) {
                Some(delay) => {
                    if !sleep_or_cancel(cancel, delay).await {
                        return Err(SubscriberError::Cancelled);
                    }
                }
                None => {
                    let err = SubscriberError::FetchFailed {
                        what: BlockTag::Number(height).to_string(),
                        source: err,
                    };
                    tracing::error!(height, error = %err, cause = %err.cause(), "skipping block");
                    return Ok(None);
                }
            }
        }
    }
}
