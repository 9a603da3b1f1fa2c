//! Emission metrics.
//!
//! ## Metrics
//!
//! `loggen_events_total`: Records successfully written, labelled `type` and `severity`
//! `loggen_event_bytes_total`: Bytes of rendered text successfully written, same labels
//!
//! Framing prefixes and the trailing newline are not counted as event bytes.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use loggen_payload::Record;
use metrics::counter;

#[derive(Debug, Default)]
struct Totals {
    events: AtomicU64,
    bytes: AtomicU64,
}

/// Handle onto the emission counters. Clones share the same totals.
#[derive(Debug, Clone, Default)]
pub struct EmissionMetrics {
    totals: Arc<Totals>,
}

impl EmissionMetrics {
    /// Create a new, zeroed [`EmissionMetrics`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one successfully written record.
    pub fn record(&self, record: &Record) {
        let bytes = record.text.len() as u64;
        let labels = [
            ("type", record.kind.clone()),
            ("severity", record.severity.clone()),
        ];
        counter!("loggen_events_total", &labels).increment(1);
        counter!("loggen_event_bytes_total", &labels).increment(bytes);
        self.totals.events.fetch_add(1, Ordering::Relaxed);
        self.totals.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records written so far.
    #[must_use]
    pub fn events(&self) -> u64 {
        self.totals.events.load(Ordering::Relaxed)
    }

    /// Event bytes written so far.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.totals.bytes.load(Ordering::Relaxed)
    }
}
