//! Record sinks for the workflow status record

use snp_sequencer::RecordSink;
use std::sync::Arc;

/// Log target of mirrored status lines
pub const STATUS_TARGET: &str = "snp::status";

/// Mirrors every status line into the tracing stream, optionally forwarding
/// it to another sink (the operator-facing record)
#[derive(Default)]
pub struct TracingSink {
    inner: Option<Arc<dyn RecordSink>>,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mirroring(inner: Arc<dyn RecordSink>) -> Self {
        Self { inner: Some(inner) }
    }
}

impl RecordSink for TracingSink {
    fn append(&self, line: &str) {
        tracing::info!(target: STATUS_TARGET, "{}", line);
        if let Some(inner) = &self.inner {
            inner.append(line);
        }
    }

    fn clear(&self) {
        if let Some(inner) = &self.inner {
            inner.clear();
        }
    }
}
