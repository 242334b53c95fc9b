//! Best-effort metrics emission.
//!
//! The engine and gateway emit counters and observations at state
//! transitions and LLM calls; the collector behind the sink is external.
//! Sinks must never block the caller.

use std::sync::Arc;

use dashmap::DashMap;

/// A non-blocking metrics collector.
pub trait MetricsSink: Send + Sync {
    /// Increment a named counter.
    fn increment(&self, name: &str, labels: &[(&str, &str)], value: u64);

    /// Record a point observation (latency, attempt count).
    fn observe(&self, name: &str, labels: &[(&str, &str)], value: f64);
}

/// Sink that drops everything.
#[derive(Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _name: &str, _labels: &[(&str, &str)], _value: u64) {}

    fn observe(&self, _name: &str, _labels: &[(&str, &str)], _value: f64) {}
}

/// In-memory sink for tests and embedded inspection.
#[derive(Debug, Default)]
pub struct MemoryMetrics {
    counters: DashMap<String, u64>,
    observations: DashMap<String, Vec<f64>>,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn series_key(name: &str, labels: &[(&str, &str)]) -> String {
        if labels.is_empty() {
            return name.to_string();
        }
        let rendered: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{name}{{{}}}", rendered.join(","))
    }

    /// Total for a counter summed across all label sets.
    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .iter()
            .filter(|entry| {
                entry.key() == name || entry.key().starts_with(&format!("{name}{{"))
            })
            .map(|entry| *entry.value())
            .sum()
    }

    /// All recorded observations for a series, across label sets.
    pub fn observations(&self, name: &str) -> Vec<f64> {
        self.observations
            .iter()
            .filter(|entry| {
                entry.key() == name || entry.key().starts_with(&format!("{name}{{"))
            })
            .flat_map(|entry| entry.value().clone())
            .collect()
    }
}

impl MetricsSink for MemoryMetrics {
    fn increment(&self, name: &str, labels: &[(&str, &str)], value: u64) {
        *self
            .counters
            .entry(Self::series_key(name, labels))
            .or_insert(0) += value;
    }

    fn observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.observations
            .entry(Self::series_key(name, labels))
            .or_default()
            .push(value);
    }
}

/// Shared sink handle; defaults to the no-op sink.
pub fn noop() -> Arc<dyn MetricsSink> {
    Arc::new(NoopMetrics)
}
