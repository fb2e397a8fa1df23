//! Per-endpoint capacity/RPS budgeting, response-time EMA, and offline
//! backoff: each [`Endpoint`] tracks one upstream connection's health and
//! scheduling state independently.

use backoff::EndpointBackoff;
use chain_time::{Time, TimeProvider};
use observability_deps::tracing::warn;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Static configuration for one upstream RPC endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// The endpoint's base URL.
    pub url: String,
    /// Max number of requests in flight at once.
    pub capacity: usize,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Optional requests-per-second ceiling.
    pub rps_limit: Option<u32>,
    /// Sliding window, in seconds, used to compute the RPS rate.
    pub rps_limit_window_secs: u32,
    /// Methods this endpoint is known not to support (e.g. a node without
    /// `debug_traceBlockByNumber` or `trace_block` enabled); the scheduler
    /// skips it for those methods rather than dispatching a call it knows
    /// will fail.
    pub missing_methods: HashSet<String>,
}

impl EndpointConfig {
    /// Construct a config with sane defaults
    /// (`capacity=5`, `request_timeout=10s`, `rps_limit_window=10s`).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            capacity: 5,
            request_timeout: Duration::from_millis(10_000),
            rps_limit: None,
            rps_limit_window_secs: 10,
            missing_methods: HashSet::new(),
        }
    }
}

/// A sliding-window exponential moving average of response times.
#[derive(Debug)]
struct ResponseTimeEma {
    mean_ms: f64,
    samples: u32,
}

impl ResponseTimeEma {
    fn new() -> Self {
        Self {
            mean_ms: 10.0,
            samples: 0,
        }
    }

    fn push(&mut self, sample_ms: f64) {
        self.samples += 1;
        let alpha = 2.0 / (self.samples.min(100) as f64 + 1.0);
        self.mean_ms += alpha * (sample_ms - self.mean_ms);
    }

    fn get(&self) -> f64 {
        self.mean_ms
    }
}

/// A simple fixed-window rate counter.
#[derive(Debug)]
struct RateWindow {
    window: Duration,
    events: VecDeque<Time>,
}

impl RateWindow {
    fn new(window_secs: u32) -> Self {
        Self {
            window: Duration::from_secs(window_secs as u64),
            events: VecDeque::new(),
        }
    }

    fn record(&mut self, now: Time) {
        self.events.push_back(now);
        self.evict(now);
    }

    fn evict(&mut self, now: Time) {
        while let Some(&front) = self.events.front() {
            match now.checked_duration_since(front) {
                Some(age) if age > self.window => {
                    self.events.pop_front();
                }
                _ => break,
            }
        }
    }

    fn count(&mut self, now: Time) -> usize {
        self.evict(now);
        self.events.len()
    }
}

#[derive(Debug)]
struct Inner {
    online: bool,
    pending_requests: usize,
    in_queue: usize,
    served: u64,
    errors: u64,
    ema: ResponseTimeEma,
    rate: Option<RateWindow>,
    backoff: EndpointBackoff,
}

/// One upstream RPC endpoint's live scheduling state: capacity accounting,
/// online/offline status, and response-time tracking.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Static configuration.
    pub config: EndpointConfig,
    state: Arc<Mutex<Inner>>,
}

/// A snapshot of one endpoint's scheduling metrics.
#[derive(Debug, Clone, Copy)]
pub struct EndpointMetrics {
    /// Average response time in milliseconds.
    pub avg_response_time_ms: f64,
    /// Total successfully served requests.
    pub served: u64,
    /// Total errored requests.
    pub errors: u64,
}

impl Endpoint {
    /// Construct a new, online endpoint.
    pub fn new(config: EndpointConfig) -> Self {
        let rate = config.rps_limit.map(|_| RateWindow::new(config.rps_limit_window_secs));
        Self {
            config,
            state: Arc::new(Mutex::new(Inner {
                online: true,
                pending_requests: 0,
                in_queue: 0,
                served: 0,
                errors: 0,
                ema: ResponseTimeEma::new(),
                rate,
                backoff: EndpointBackoff::default(),
            })),
        }
    }

    /// Whether this endpoint currently accepts new requests.
    pub fn is_online(&self) -> bool {
        self.state.lock().online
    }

    /// Whether this endpoint is known to support `method`.
    pub fn can_handle(&self, method: &str) -> bool {
        !self.config.missing_methods.contains(method)
    }

    /// Advisory count of items the scheduler has earmarked for this
    /// endpoint but not yet dispatched.
    pub fn in_queue(&self) -> usize {
        self.state.lock().in_queue
    }

    /// Mark one item as earmarked for this endpoint.
    pub fn mark_in_queue(&self) {
        self.state.lock().in_queue += 1;
    }

    /// Clear one item's earmark, once it's been popped off the heap.
    pub fn unmark_in_queue(&self) {
        let mut inner = self.state.lock();
        inner.in_queue = inner.in_queue.saturating_sub(1);
    }

    /// Remaining request-slot capacity right now.
    pub fn capacity(&self) -> usize {
        let inner = self.state.lock();
        self.config.capacity.saturating_sub(inner.pending_requests)
    }

    /// Remaining RPS budget at `now`, or `usize::MAX` if unbounded.
    pub fn rps_capacity(&self, now: Time) -> usize {
        let mut inner = self.state.lock();
        match (&mut inner.rate, self.config.rps_limit) {
            (Some(rate), Some(limit)) => (limit as usize).saturating_sub(rate.count(now)),
            _ => usize::MAX,
        }
    }

    /// Current average response time, in milliseconds.
    pub fn avg_response_time_ms(&self) -> f64 {
        self.state.lock().ema.get()
    }

    /// Record that a request is about to be sent: bumps pending-request and
    /// RPS counters.
    pub fn begin_request(&self, now: Time) {
        let mut inner = self.state.lock();
        inner.pending_requests += 1;
        if let Some(rate) = &mut inner.rate {
            rate.record(now);
        }
    }

    /// Record a successful completion: updates the response-time EMA and
    /// resets the consecutive-error counter.
    pub fn record_success(&self, elapsed_ms: f64) {
        let mut inner = self.state.lock();
        inner.pending_requests = inner.pending_requests.saturating_sub(1);
        inner.served += 1;
        inner.ema.push(elapsed_ms);
        inner.backoff.reset();
    }

    /// Record a retryable failure: takes the endpoint offline for the next
    /// step of [`backoff::ENDPOINT_BACKOFF_SCHEDULE_MS`] and schedules a
    /// reconnect after that delay.
    pub async fn record_error_and_backoff(&self, time_provider: &dyn TimeProvider) {
        let delay_ms = {
            let mut inner = self.state.lock();
            inner.pending_requests = inner.pending_requests.saturating_sub(1);
            inner.errors += 1;
            inner.online = false;
            inner.backoff.next_offline_duration()
        };
        warn!(url = %self.config.url, delay_ms, "rpc endpoint going offline");
        time_provider.sleep(Duration::from_millis(delay_ms)).await;
        self.state.lock().online = true;
    }

    /// Record a non-retryable failure that still completed an HTTP round
    /// trip (counts toward `served`/response time like a success, per
    /// `_count_request` in the original connection).
    pub fn record_fatal_but_completed(&self, elapsed_ms: f64) {
        self.record_success(elapsed_ms);
    }

    /// A metrics snapshot for observability/reporting.
    pub fn metrics(&self) -> EndpointMetrics {
        let inner = self.state.lock();
        EndpointMetrics {
            avg_response_time_ms: inner.ema.get(),
            served: inner.served,
            errors: inner.errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_time::MockProvider;

    #[test]
    fn capacity_shrinks_with_pending_requests() {
        let endpoint = Endpoint::new(EndpointConfig::new("http://example"));
        assert_eq!(endpoint.capacity(), 5);
        let now = Time::from_datetime(chrono::Utc::now());
        endpoint.begin_request(now);
        assert_eq!(endpoint.capacity(), 4);
        endpoint.record_success(12.0);
        assert_eq!(endpoint.capacity(), 5);
    }

    #[tokio::test]
    async fn offline_after_error_comes_back_online() {
        let endpoint = Endpoint::new(EndpointConfig::new("http://example"));
        let provider = MockProvider::new(Time::from_datetime(chrono::Utc::now()));
        endpoint.begin_request(provider.now());
        assert!(endpoint.is_online());
        endpoint.record_error_and_backoff(&provider).await;
        assert!(endpoint.is_online());
    }

    #[test]
    fn rps_capacity_is_unbounded_without_limit() {
        let endpoint = Endpoint::new(EndpointConfig::new("http://example"));
        let now = Time::from_datetime(chrono::Utc::now());
        assert_eq!(endpoint.rps_capacity(now), usize::MAX);
    }
}
