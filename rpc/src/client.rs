//! JSON-RPC batch client: a priority-ordered scheduler that dispatches
//! queued calls across [`Endpoint`]s by least-loaded response time.

use crate::transport::{Endpoint, EndpointConfig};
use chain_time::{SystemProvider, Time, TimeProvider};
use metric::{DurationHistogram, Metric, Registry, U64Counter};
use observability_deps::tracing::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::Snafu;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex as AsyncMutex};

/// Call-scheduling metrics recorded against each dispatched request.
struct ClientMetrics {
    completed: Metric<U64Counter>,
    retried: Metric<U64Counter>,
    latency: Metric<DurationHistogram>,
}

impl ClientMetrics {
    fn new(registry: &Registry) -> Self {
        Self {
            completed: registry.register_metric("rpc_calls_completed", "rpc calls that returned a result"),
            retried: registry.register_metric("rpc_calls_retried", "rpc calls requeued after a retryable failure"),
            latency: registry.register_metric("rpc_call_latency_ms", "elapsed time of a completed rpc call, by method"),
        }
    }
}

/// One JSON-RPC 2.0 request envelope.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub id: u64,
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Option<Vec<Value>>,
}

/// What one queued heap item sends over the wire: either a single request
/// or a JSON-RPC batch (array of requests dispatched and answered together).
#[derive(Debug, Clone)]
enum RpcPayload {
    Single(RpcRequest),
    Batch(Vec<RpcRequest>),
}

impl RpcPayload {
    fn methods(&self) -> Vec<&str> {
        match self {
            RpcPayload::Single(r) => vec![r.method.as_str()],
            RpcPayload::Batch(rs) => rs.iter().map(|r| r.method.as_str()).collect(),
        }
    }
}

/// A JSON-RPC 2.0 response envelope, either a result or an error.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponseEnvelope {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

/// Errors surfaced from a completed (non-retried) RPC call.
#[derive(Debug, Snafu)]
pub enum RpcError {
    /// The server returned a JSON-RPC error object.
    #[snafu(display("rpc error from {url}: {info}"))]
    Protocol { info: Value, url: String },

    /// The server returned `"result": null`, which the archive treats as a
    /// transient condition worth retrying, but surfaces as an error once
    /// retries are exhausted.
    #[snafu(display("rpc result is null for request to {url}"))]
    NullResult { url: String },

    /// Transport-level failure (connection, timeout, non-2xx status) that
    /// was not retried away.
    #[snafu(display("rpc transport error calling {url}: {source}"))]
    Transport { source: reqwest::Error, url: String },

    /// The response body wasn't valid JSON or didn't match the expected
    /// envelope shape.
    #[snafu(display("malformed rpc response from {url}: {message}"))]
    Malformed { message: String, url: String },

    /// The scheduler task was dropped before it could respond, e.g. during
    /// shutdown.
    #[snafu(display("rpc client shut down before the call completed"))]
    SchedulerDropped,
}

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 502 | 503 | 504 | 530)
}

/// RPC error codes worth retrying: rate limiting, and the upstream-node
/// transient codes Erigon/Geth/OpenEthereum return for "not ready yet" or
/// "try again" conditions.
const RETRYABLE_RPC_CODES: &[i64] = &[63, 429, -32000, -32002, -32007, -32017, -32602, -32603];

fn is_retryable_rpc_error(info: &Value) -> bool {
    match info.get("code").and_then(Value::as_i64) {
        Some(code) => RETRYABLE_RPC_CODES.contains(&code),
        None => false,
    }
}

struct QueueItem {
    priority: i64,
    seq: u64,
    payload: RpcPayload,
    respond: oneshot::Sender<Result<Vec<Value>, RpcError>>,
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueueItem {}

impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert priority and sequence so the
        // lowest-priority, oldest request pops first (matches heapq's
        // min-heap ordering on `_ReqItem(priority, id, ...)`).
        other.priority.cmp(&self.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("endpoints", &self.endpoints.len())
            .finish_non_exhaustive()
    }
}

/// A JSON-RPC client load-balancing calls across a pool of endpoints.
pub struct RpcClient {
    http: reqwest::Client,
    endpoints: Vec<Endpoint>,
    queue: Arc<AsyncMutex<BinaryHeap<QueueItem>>>,
    next_id: AtomicU64,
    next_seq: AtomicU64,
    time_provider: Arc<dyn TimeProvider>,
    registry: Registry,
    metrics: ClientMetrics,
}

impl RpcClient {
    /// Build a client over the given endpoint configurations, using the
    /// system wall clock and a private metric registry.
    pub fn new(endpoints: Vec<EndpointConfig>) -> Self {
        Self::with_time_provider(endpoints, Arc::new(SystemProvider))
    }

    /// Build a client with an injected [`TimeProvider`], for deterministic
    /// backoff/rate-limit tests.
    pub fn with_time_provider(endpoints: Vec<EndpointConfig>, time_provider: Arc<dyn TimeProvider>) -> Self {
        let registry = Registry::new();
        let metrics = ClientMetrics::new(&registry);
        Self {
            http: reqwest::Client::new(),
            endpoints: endpoints.into_iter().map(Endpoint::new).collect(),
            queue: Arc::new(AsyncMutex::new(BinaryHeap::new())),
            next_id: AtomicU64::new(0),
            next_seq: AtomicU64::new(0),
            time_provider,
            registry,
            metrics,
        }
    }

    /// Metrics for every configured endpoint, in configuration order.
    pub fn endpoint_metrics(&self) -> Vec<crate::transport::EndpointMetrics> {
        self.endpoints.iter().map(Endpoint::metrics).collect()
    }

    /// The client's private metric registry, for callers that want to report
    /// call-scheduling counters (`rpc_calls_completed`, `rpc_calls_retried`,
    /// `rpc_call_latency_ms`) alongside their own.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Enqueue a single JSON-RPC call. Lower `priority` values are served
    /// first (matches the original heap's `_ReqItem(priority, id, ...)`
    /// min-heap ordering).
    pub async fn call(&self, method: &str, params: Option<Vec<Value>>, priority: i64) -> Result<Value, RpcError> {
        let request = self.next_request(method, params);
        let results = self.enqueue(RpcPayload::Single(request), priority).await?;
        Ok(results.into_iter().next().unwrap_or(Value::Null))
    }

    /// Computes the largest batch this pool's most RPS-constrained endpoint
    /// can absorb in one request, capped by `batch_limit`.
    pub fn max_batch_size(&self, batch_limit: usize) -> usize {
        let min_endpoint_rps = self.endpoints.iter().filter_map(|e| e.config.rps_limit).min();
        let from_rps = min_endpoint_rps.map(|rps| ((rps as f64 / 5.0).round() as usize).max(1));
        from_rps.unwrap_or(batch_limit).min(batch_limit.max(1))
    }

    /// Fan out a batch of `(method, params)` calls as JSON-RPC batch
    /// requests sized by [`Self::max_batch_size`], one heap item per chunk,
    /// and fan the per-chunk results back in, in call order.
    pub async fn batch_call(&self, calls: Vec<(String, Option<Vec<Value>>)>, priority: i64) -> Result<Vec<Value>, RpcError> {
        let max_batch = self.max_batch_size(calls.len().max(1));
        let mut results = Vec::with_capacity(calls.len());
        for chunk in calls.chunks(max_batch.max(1)) {
            let requests: Vec<RpcRequest> = chunk.iter().map(|(method, params)| self.next_request(method, params.clone())).collect();
            results.extend(self.enqueue(RpcPayload::Batch(requests), priority).await?);
        }
        Ok(results)
    }

    fn next_request(&self, method: &str, params: Option<Vec<Value>>) -> RpcRequest {
        let id = self.next_id.fetch_add(1, AtomicOrdering::Relaxed);
        RpcRequest {
            id,
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
        }
    }

    async fn enqueue(&self, payload: RpcPayload, priority: i64) -> Result<Vec<Value>, RpcError> {
        let (tx, rx) = oneshot::channel();
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        let methods = payload.methods();
        {
            let mut queue = self.queue.lock().await;
            queue.push(QueueItem {
                priority,
                seq,
                payload,
                respond: tx,
            });
        }
        for endpoint in &self.endpoints {
            if methods.iter().all(|m| endpoint.can_handle(m)) {
                endpoint.mark_in_queue();
            }
        }
        self.schedule().await;
        rx.await.unwrap_or(Err(RpcError::SchedulerDropped))
    }

    /// Drain as much of the queue as the current endpoint capacity allows,
    /// dispatching each taken item as a background task. Mirrors
    /// `RpcClient._schedule`: endpoints are tried by lowest `in_queue`,
    /// then fastest-first, skipping items the endpoint is known not to
    /// support via `missing_methods`.
    pub async fn schedule(&self) {
        let mut ordered: Vec<&Endpoint> = self.endpoints.iter().collect();
        ordered.sort_by(|a, b| {
            a.in_queue()
                .cmp(&b.in_queue())
                .then_with(|| a.avg_response_time_ms().partial_cmp(&b.avg_response_time_ms()).unwrap())
        });

        let now = self.time_provider.now();
        for endpoint in ordered {
            if !endpoint.is_online() {
                continue;
            }
            let cap = endpoint.capacity().min(endpoint.rps_capacity(now));
            if cap == 0 {
                continue;
            }

            let mut queue = self.queue.lock().await;
            if queue.is_empty() {
                return;
            }
            let mut taken = Vec::new();
            let mut deferred = Vec::new();
            while taken.len() < cap {
                match queue.pop() {
                    None => break,
                    Some(item) => {
                        if item.payload.methods().iter().all(|m| endpoint.can_handle(m)) {
                            taken.push(item);
                        } else {
                            deferred.push(item);
                        }
                    }
                }
            }
            for item in deferred {
                queue.push(item);
            }
            drop(queue);

            for item in taken {
                for other in &self.endpoints {
                    if item.payload.methods().iter().all(|m| other.can_handle(m)) {
                        other.unmark_in_queue();
                    }
                }
                self.dispatch(endpoint.clone(), item);
            }
        }
    }

    fn dispatch(&self, endpoint: Endpoint, item: QueueItem) {
        let http = self.http.clone();
        let queue = self.queue.clone();
        let time_provider = self.time_provider.clone();
        let completed = self.metrics.completed.clone();
        let retried = self.metrics.retried.clone();
        let latency = self.metrics.latency.clone();
        tokio::spawn(async move {
            let started = time_provider.now();
            endpoint.begin_request(started);
            let method_label = item.payload.methods().join(",");
            debug!(methods = %method_label, "rpc send");

            let outcome = send_payload(&http, &endpoint.config.url, &item.payload).await;
            let elapsed_ms = elapsed_ms(time_provider.as_ref(), started);

            match outcome {
                Ok(Retry::Retry) => {
                    endpoint.record_error_and_backoff(time_provider.as_ref()).await;
                    retried.recorder(vec![("endpoint", endpoint.config.url.clone())]).inc(1);
                    let mut queue = queue.lock().await;
                    queue.push(item);
                }
                Ok(Retry::Done(result)) => {
                    endpoint.record_success(elapsed_ms);
                    completed.recorder(vec![("method", method_label.clone())]).inc(1);
                    latency
                        .recorder(vec![("method", method_label)])
                        .record(Duration::from_secs_f64(elapsed_ms / 1000.0));
                    let _ = item.respond.send(result);
                }
            }
        });
    }
}

fn elapsed_ms(time_provider: &dyn TimeProvider, started: Time) -> f64 {
    time_provider.now().checked_duration_since(started).as_secs_f64() * 1000.0
}

enum Retry {
    Retry,
    Done(Result<Vec<Value>, RpcError>),
}

/// Sends a single request or a JSON-RPC batch, sorts batch responses by
/// `id`, and pairs them element-wise with the request list. A missing `id`,
/// a null `result`, or a retryable error code anywhere in the batch fails
/// the whole item for a retry; a non-retryable application error fails the
/// whole item, fail-fast, the same as a composite future resolving on its
/// first rejected sub-future.
async fn send_payload(http: &reqwest::Client, url: &str, payload: &RpcPayload) -> Result<Retry, ()> {
    let body = match payload {
        RpcPayload::Single(request) => http.post(url).json(request),
        RpcPayload::Batch(requests) => http.post(url).json(requests),
    };

    let response = match body.header("accept", "application/json").send().await {
        Ok(r) => r,
        Err(e) => {
            return Ok(if e.is_connect() || e.is_timeout() {
                Retry::Retry
            } else {
                Retry::Done(Err(RpcError::Transport {
                    source: e,
                    url: url.to_string(),
                }))
            });
        }
    };

    let status = response.status();
    if !status.is_success() {
        return Ok(if is_retryable_status(status) {
            Retry::Retry
        } else {
            Retry::Done(Err(RpcError::Protocol {
                info: serde_json::json!({ "httpStatus": status.as_u16() }),
                url: url.to_string(),
            }))
        });
    }

    let ids: Vec<u64> = match payload {
        RpcPayload::Single(r) => vec![r.id],
        RpcPayload::Batch(rs) => rs.iter().map(|r| r.id).collect(),
    };

    let envelopes: Vec<RpcResponseEnvelope> = match payload {
        RpcPayload::Single(_) => match response.json::<RpcResponseEnvelope>().await {
            Ok(b) => vec![b],
            Err(e) => {
                return Ok(Retry::Done(Err(RpcError::Malformed {
                    message: e.to_string(),
                    url: url.to_string(),
                })))
            }
        },
        RpcPayload::Batch(_) => match response.json::<Vec<RpcResponseEnvelope>>().await {
            Ok(b) => b,
            Err(e) => {
                return Ok(Retry::Done(Err(RpcError::Malformed {
                    message: e.to_string(),
                    url: url.to_string(),
                })))
            }
        },
    };

    let by_id: std::collections::HashMap<u64, RpcResponseEnvelope> = envelopes.into_iter().map(|e| (e.id, e)).collect();

    let mut values = Vec::with_capacity(ids.len());
    for id in &ids {
        let envelope = match by_id.get(id) {
            Some(e) => e,
            None => return Ok(Retry::Retry),
        };
        if let Some(info) = &envelope.error {
            return Ok(if is_retryable_rpc_error(info) {
                Retry::Retry
            } else {
                Retry::Done(Err(RpcError::Protocol {
                    info: info.clone(),
                    url: url.to_string(),
                }))
            });
        }
        match &envelope.result {
            Some(value) => values.push(value.clone()),
            None => return Ok(Retry::Retry),
        }
    }

    Ok(Retry::Done(Ok(values)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_item_orders_by_priority_then_sequence() {
        let mut heap = BinaryHeap::new();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        heap.push(QueueItem {
            priority: 5,
            seq: 0,
            payload: RpcPayload::Single(RpcRequest {
                id: 0,
                jsonrpc: "2.0",
                method: "a".into(),
                params: None,
            }),
            respond: tx1,
        });
        heap.push(QueueItem {
            priority: 1,
            seq: 1,
            payload: RpcPayload::Single(RpcRequest {
                id: 1,
                jsonrpc: "2.0",
                method: "b".into(),
                params: None,
            }),
            respond: tx2,
        });
        let first = heap.pop().unwrap();
        assert_eq!(first.priority, 1);
    }

    #[test]
    fn retryable_status_codes() {
        assert!(is_retryable_status(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(reqwest::StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(reqwest::StatusCode::NOT_FOUND));
    }

    #[test]
    fn retryable_rpc_error_codes() {
        assert!(is_retryable_rpc_error(&serde_json::json!({"code": -32000})));
        assert!(is_retryable_rpc_error(&serde_json::json!({"code": 429})));
        assert!(is_retryable_rpc_error(&serde_json::json!({"code": 63})));
        assert!(is_retryable_rpc_error(&serde_json::json!({"code": -32602})));
        assert!(!is_retryable_rpc_error(&serde_json::json!({"code": -32601})));
    }

    #[test]
    fn client_registers_call_scheduling_metrics() {
        let client = RpcClient::new(vec![EndpointConfig::new("http://localhost:8545")]);
        let names: Vec<&str> = client.registry().registered().into_iter().map(|(name, _)| name).collect();
        assert!(names.contains(&"rpc_calls_completed"));
        assert!(names.contains(&"rpc_calls_retried"));
        assert!(names.contains(&"rpc_call_latency_ms"));
    }

    #[test]
    fn max_batch_size_derives_from_min_endpoint_rps() {
        let client = RpcClient::new(vec![
            {
                let mut cfg = EndpointConfig::new("http://a");
                cfg.rps_limit = Some(50);
                cfg
            },
            {
                let mut cfg = EndpointConfig::new("http://b");
                cfg.rps_limit = Some(10);
                cfg
            },
        ]);
        assert_eq!(client.max_batch_size(100), 2);
    }

    #[test]
    fn max_batch_size_falls_back_to_limit_without_rps_caps() {
        let client = RpcClient::new(vec![EndpointConfig::new("http://a")]);
        assert_eq!(client.max_batch_size(100), 100);
    }
}
