//! Consumers of delivered headers and logs.

use std::io::Write;

use crate::types::{Header, Log};

/// Receives each uniquely delivered item exactly once per delivery.
///
/// Delivery is at-least-once across reconnects, so implementations must
/// tolerate seeing the same header or log again.
pub trait EventSink<T>: Send {
    fn deliver(&mut self, item: &T);
}

impl<T, F> EventSink<T> for F
where
    F: FnMut(&T) + Send,
{
    fn deliver(&mut self, item: &T) {
        self(item)
    }
}

/// Writes a line-oriented, human-readable dump of every record.
pub struct RecordPrinter<W> {
    out: W,
}

impl RecordPrinter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> RecordPrinter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_header(&mut self, h: &Header) -> std::io::Result<()> {
        let rule = "-".repeat(48);
        writeln!(self.out, "{rule}")?;
        writeln!(self.out, "Block number: {}", h.number)?;
        writeln!(self.out, "Block hash:   {}", h.hash)?;
        writeln!(self.out, "Parent hash:  {}", h.parent_hash)?;
        writeln!(self.out, "Timestamp:    {}", h.timestamp_display())?;
        writeln!(self.out, "Nonce:        {}", h.nonce)?;
        writeln!(self.out, "{rule}")?;
        self.out.flush()
    }

    fn write_log(&mut self, log: &Log) -> std::io::Result<()> {
        let rule = "=".repeat(48);
        writeln!(self.out, "{rule}")?;
        writeln!(self.out, "Block number: {}", log.block_number)?;
        writeln!(self.out, "Tx hash:      {}", log.tx_hash)?;
        writeln!(self.out, "Log index:    {}", log.log_index)?;
        writeln!(self.out, "Address:      {}", log.address)?;
        if log.removed {
            writeln!(self.out, "Removed:      true")?;
        }
        writeln!(self.out, "Topics:")?;
        for (i, topic) in log.topics.iter().enumerate() {
            writeln!(self.out, "  [{i}] {topic}")?;
        }
        writeln!(self.out, "Data (hex):   {}", hex::encode(&log.data))?;
        writeln!(self.out, "{rule}")?;
        self.out.flush()
    }
}

impl<W: Write + Send> EventSink<Header> for RecordPrinter<W> {
    fn deliver(&mut self, header: &Header) {
        if let Err(e) = self.write_header(header) {
            tracing::warn!(height = header.number, error = %e, "failed to print header");
        }
    }
}

impl<W: Write + Send> EventSink<Log> for RecordPrinter<W> {
    fn deliver(&mut self, log: &Log) {
        if let Err(e) = self.write_log(log) {
            tracing::warn!(tx = %log.tx_hash, error = %e, "failed to print log");
        }
    }
}
