//! Metrics sinks
//!
//! Components publish named values through an injected [`MetricsSink`]
//! instead of reaching for a global overlay. The binary creates one sink at
//! startup and hands clones of the `Arc` to every match.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

/// A single published value
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Count(u64),
    Gauge(f64),
}

impl MetricValue {
    pub fn as_count(&self) -> Option<u64> {
        match self {
            Self::Count(n) => Some(*n),
            Self::Gauge(_) => None,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Count(n) => *n as f64,
            Self::Gauge(v) => *v,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(n) => write!(f, "{n}"),
            Self::Gauge(v) => write!(f, "{v:.4}"),
        }
    }
}

impl From<u64> for MetricValue {
    fn from(n: u64) -> Self {
        Self::Count(n)
    }
}

impl From<f32> for MetricValue {
    fn from(v: f32) -> Self {
        Self::Gauge(f64::from(v))
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        Self::Gauge(v)
    }
}

/// Destination for `(category, key, value)` samples
pub trait MetricsSink: Send + Sync {
    fn record(&self, category: &str, key: &str, value: MetricValue);

    /// Called once at shutdown
    fn flush(&self) {}
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _category: &str, _key: &str, _value: MetricValue) {}
}

/// Emits every sample as a `tracing` event on the `metrics` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record(&self, category: &str, key: &str, value: MetricValue) {
        tracing::debug!(target: "metrics", category, key, %value);
    }

    fn flush(&self) {
        info!(target: "metrics", "Metrics flushed");
    }
}

/// Keeps the latest value per `(category, key)`
#[derive(Debug, Default)]
pub struct MemoryMetrics {
    values: Mutex<BTreeMap<(String, String), MetricValue>>,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, category: &str, key: &str) -> Option<MetricValue> {
        self.values
            .lock()
            .get(&(category.to_string(), key.to_string()))
            .copied()
    }

    pub fn count(&self, category: &str, key: &str) -> u64 {
        self.get(category, key)
            .and_then(|v| v.as_count())
            .unwrap_or(0)
    }

    /// Everything recorded, as `category.key -> value`
    pub fn snapshot(&self) -> BTreeMap<String, MetricValue> {
        self.values
            .lock()
            .iter()
            .map(|((category, key), value)| (format!("{category}.{key}"), *value))
            .collect()
    }
}

impl MetricsSink for MemoryMetrics {
    fn record(&self, category: &str, key: &str, value: MetricValue) {
        self.values
            .lock()
            .insert((category.to_string(), key.to_string()), value);
    }
}
