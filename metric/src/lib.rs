//! A small, dependency-light metric registry.
//!
//! This intentionally does not talk to Prometheus or any other exporter —
//! exposing metrics over the wire is a separate, out-of-scope concern. This
//! crate only gives the rest of the workspace a consistent place to record
//! counters and duration histograms for later inspection (e.g. via a debug
//! command or a future exporter crate).

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// A set of key-value attributes identifying one time series.
pub type Attributes = Vec<(&'static str, String)>;

/// Something that can be recorded into a metric.
pub trait MetricObserver: Debug + Send + Sync + 'static {
    /// The recorded value type (e.g. `u64` for a counter).
    type Recording;

    /// Fold a new observation into this metric's state.
    fn observe(&self, recording: Self::Recording);
}

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct U64Counter {
    value: Mutex<u64>,
}

impl U64Counter {
    /// Increment the counter by `delta`.
    pub fn inc(&self, delta: u64) {
        *self.value.lock() += delta;
    }

    /// Current counter value.
    pub fn fetch(&self) -> u64 {
        *self.value.lock()
    }
}

/// A running count + sum of durations, for a cheap mean without a full
/// histogram implementation.
#[derive(Debug, Default)]
pub struct DurationHistogram {
    inner: Mutex<DurationHistogramInner>,
}

#[derive(Debug, Default)]
struct DurationHistogramInner {
    count: u64,
    total: Duration,
}

impl DurationHistogram {
    /// Record one observed duration.
    pub fn record(&self, d: Duration) {
        let mut inner = self.inner.lock();
        inner.count += 1;
        inner.total += d;
    }

    /// Arithmetic mean of all recorded durations, or `None` if none recorded.
    pub fn mean(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        if inner.count == 0 {
            None
        } else {
            Some(inner.total / inner.count as u32)
        }
    }

    /// Number of observations recorded.
    pub fn count(&self) -> u64 {
        self.inner.lock().count
    }
}

/// A named metric, specialized by attribute set. Mirrors the shape used
/// throughout the archive: callers register a `Metric<T>` once and then
/// fetch (or create) a per-attribute-set recorder with [`Metric::recorder`].
#[derive(Debug)]
pub struct Metric<T> {
    name: &'static str,
    description: &'static str,
    recorders: Arc<Mutex<BTreeMap<Attributes, Arc<T>>>>,
}

impl<T> Clone for Metric<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            description: self.description,
            recorders: Arc::clone(&self.recorders),
        }
    }
}

impl<T> Metric<T>
where
    T: Default + Send + Sync + 'static,
{
    /// Fetch (creating if absent) the recorder for the given attribute set.
    pub fn recorder(&self, attributes: impl Into<Attributes>) -> Arc<T> {
        let attributes = attributes.into();
        let mut recorders = self.recorders.lock();
        Arc::clone(
            recorders
                .entry(attributes)
                .or_insert_with(|| Arc::new(T::default())),
        )
    }

    /// The metric's registered name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The metric's registered help text.
    pub fn description(&self) -> &'static str {
        self.description
    }
}

/// Process-wide (or test-scoped) registry of metrics.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    inner: Arc<Mutex<Vec<(&'static str, &'static str)>>>,
}

impl Registry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new metric family under `name`, returning a handle used to
    /// create per-attribute-set recorders.
    pub fn register_metric<T>(&self, name: &'static str, description: &'static str) -> Metric<T>
    where
        T: Default + Send + Sync + 'static,
    {
        self.inner.lock().push((name, description));
        Metric {
            name,
            description,
            recorders: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Names and descriptions of every metric family registered so far.
    pub fn registered(&self) -> Vec<(&'static str, &'static str)> {
        self.inner.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_recorder_is_shared_per_attribute_set() {
        let registry = Registry::new();
        let metric: Metric<U64Counter> =
            registry.register_metric("rpc_retries", "retryable errors observed per endpoint");

        let a = metric.recorder(vec![("endpoint", "a".to_string())]);
        let a_again = metric.recorder(vec![("endpoint", "a".to_string())]);
        let b = metric.recorder(vec![("endpoint", "b".to_string())]);

        a.inc(1);
        a_again.inc(1);
        b.inc(5);

        assert_eq!(a.fetch(), 2);
        assert_eq!(b.fetch(), 5);
        assert_eq!(registry.registered(), vec![("rpc_retries", "retryable errors observed per endpoint")]);
    }

    #[test]
    fn duration_histogram_mean() {
        let h = DurationHistogram::default();
        assert_eq!(h.mean(), None);
        h.record(Duration::from_millis(10));
        h.record(Duration::from_millis(30));
        assert_eq!(h.mean(), Some(Duration::from_millis(20)));
        assert_eq!(h.count(), 2);
    }
}
