//! Scalar diagnostics sinks shared by the MDCV training loops.
//!
//! Training emits one scalar per step for the loss and one per computed
//! eigenvalue; any observer honouring [`MetricSink::record`] can collect
//! them. Sinks must be cheap when nobody is listening, so the null sink is
//! the default everywhere.

use std::sync::RwLock;

/// A single recorded scalar.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricRecord {
    pub name: String,
    pub value: f64,
    pub step: u64,
}

/// Observer interface for per-step scalar diagnostics.
pub trait MetricSink: Send + Sync {
    /// Records one named scalar for the given training step.
    fn record(&self, name: &str, value: f64, step: u64);
}

/// Sink that discards every record.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl MetricSink for NullSink {
    fn record(&self, _name: &str, _value: f64, _step: u64) {}
}

/// Sink that retains every record in memory. Intended for tests and small
/// interactive runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: RwLock<Vec<MetricRecord>>,
}

impl MemorySink {
    /// Creates an empty in-memory sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of everything recorded so far.
    pub fn snapshot(&self) -> Vec<MetricRecord> {
        self.records.read().expect("metric store poisoned").clone()
    }

    /// Returns the recorded values for one metric name, in insertion order.
    pub fn values_for(&self, name: &str) -> Vec<f64> {
        self.records
            .read()
            .expect("metric store poisoned")
            .iter()
            .filter(|record| record.name == name)
            .map(|record| record.value)
            .collect()
    }

    /// Drops every stored record.
    pub fn clear(&self) {
        self.records.write().expect("metric store poisoned").clear();
    }
}

impl MetricSink for MemorySink {
    fn record(&self, name: &str, value: f64, step: u64) {
        self.records
            .write()
            .expect("metric store poisoned")
            .push(MetricRecord {
                name: name.to_string(),
                value,
                step,
            });
    }
}

/// Sink that forwards records to the `tracing` subscriber at info level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl MetricSink for TracingSink {
    fn record(&self, name: &str, value: f64, step: u64) {
        tracing::info!(target: "mdcv::metrics", metric = name, value, step);
    }
}
