//! Backoff functionality.
//!
//! Two schedules live here because the archive needs both kinds:
//!
//! - [`Backoff`]: classic exponential-with-jitter, used by background sync
//!   retries (downloader failures, see the "Transient sync" row of the
//!   error taxonomy).
//! - [`EndpointBackoff`]: the RPC transport's fixed step table, backing off
//!   an endpoint by a small lookup table indexed by consecutive-error
//!   count, not a multiplicative formula.
#![warn(missing_debug_implementations, missing_docs)]

use observability_deps::tracing::info;
use rand::prelude::*;
use std::ops::ControlFlow;
use std::time::Duration;

/// Exponential backoff with jitter.
///
/// See <https://aws.amazon.com/blogs/architecture/exponential-backoff-and-jitter/>
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Initial backoff.
    pub init_backoff: Duration,
    /// Maximum backoff.
    pub max_backoff: Duration,
    /// Multiplier for each backoff round.
    pub base: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(500),
            base: 3.,
        }
    }
}

/// Backoff result. Retrying never gives up on its own; a caller that wants a
/// timeout should race this against its own deadline.
pub type BackoffResult<T> = Result<T, std::convert::Infallible>;

/// [`Backoff`] can be created from a [`BackoffConfig`].
/// Consecutive calls to the internal `next` return the next backoff interval.
pub struct Backoff {
    init_backoff: f64,
    next_backoff_secs: f64,
    max_backoff_secs: f64,
    base: f64,
    rng: Option<Box<dyn RngCore + Sync + Send>>,
}

impl std::fmt::Debug for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backoff")
            .field("init_backoff", &self.init_backoff)
            .field("next_backoff_secs", &self.next_backoff_secs)
            .field("max_backoff_secs", &self.max_backoff_secs)
            .field("base", &self.base)
            .finish()
    }
}

impl Backoff {
    /// Create a new [`Backoff`] from the provided [`BackoffConfig`].
    pub fn new(config: &BackoffConfig) -> Self {
        Self::new_with_rng(config, None)
    }

    /// Creates a new `Backoff` with the optional `rng`. Uses
    /// [`rand::thread_rng()`] if no rng is provided.
    pub fn new_with_rng(config: &BackoffConfig, rng: Option<Box<dyn RngCore + Sync + Send>>) -> Self {
        let init_backoff = config.init_backoff.as_secs_f64();
        Self {
            init_backoff,
            next_backoff_secs: init_backoff,
            max_backoff_secs: config.max_backoff.as_secs_f64(),
            base: config.base,
            rng,
        }
    }

    fn next(&mut self) -> Duration {
        let range = self.init_backoff..(self.next_backoff_secs * self.base);
        let rand_backoff = match self.rng.as_mut() {
            Some(rng) => rng.gen_range(range),
            None => thread_rng().gen_range(range),
        };
        let next_backoff = self.max_backoff_secs.min(rand_backoff);
        Duration::from_secs_f64(std::mem::replace(&mut self.next_backoff_secs, next_backoff))
    }

    /// Perform an async operation that retries with a backoff on
    /// [`ControlFlow::Continue`].
    pub async fn retry_with_backoff<F, F1, B, E>(&mut self, task_name: &str, mut do_stuff: F) -> BackoffResult<B>
    where
        F: (FnMut() -> F1) + Send,
        F1: std::future::Future<Output = ControlFlow<B, E>> + Send,
        E: std::error::Error + Send,
    {
        loop {
            let e = match do_stuff().await {
                ControlFlow::Break(r) => break Ok(r),
                ControlFlow::Continue(e) => e,
            };

            let backoff = self.next();
            info!(
                e = %e,
                task_name,
                backoff_secs = backoff.as_secs(),
                "task encountered non-fatal error - backing off",
            );
            tokio::time::sleep(backoff).await;
        }
    }

    /// Retry all errors returned by `do_stuff`.
    pub async fn retry_all_errors<F, F1, B, E>(&mut self, task_name: &str, mut do_stuff: F) -> BackoffResult<B>
    where
        F: (FnMut() -> F1) + Send,
        F1: std::future::Future<Output = Result<B, E>> + Send,
        E: std::error::Error + Send,
    {
        self.retry_with_backoff(task_name, move || {
            let do_stuff = do_stuff();
            async {
                match do_stuff.await {
                    Ok(b) => ControlFlow::Break(b),
                    Err(e) => ControlFlow::Continue(e),
                }
            }
        })
        .await
    }
}

/// The fixed offline-backoff schedule an RPC endpoint walks through on
/// consecutive retryable errors, in milliseconds.
pub const ENDPOINT_BACKOFF_SCHEDULE_MS: [u64; 6] = [10, 100, 500, 2000, 10000, 20000];

/// Table-driven backoff for a single RPC endpoint: each consecutive error
/// advances one step (capped at the table's end) and resets to zero on a
/// success.
#[derive(Debug, Default, Clone, Copy)]
pub struct EndpointBackoff {
    errors_in_row: usize,
}

impl EndpointBackoff {
    /// Duration to go offline for after another consecutive error, and bump
    /// the internal error counter.
    pub fn next_offline_duration(&mut self) -> Duration {
        let idx = self.errors_in_row.min(ENDPOINT_BACKOFF_SCHEDULE_MS.len() - 1);
        self.errors_in_row += 1;
        Duration::from_millis(ENDPOINT_BACKOFF_SCHEDULE_MS[idx])
    }

    /// Reset the consecutive-error counter after a success.
    pub fn reset(&mut self) {
        self.errors_in_row = 0;
    }

    /// Number of consecutive errors observed so far.
    pub fn errors_in_row(&self) -> usize {
        self.errors_in_row
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn test_backoff() {
        let init_backoff_secs = 1.;
        let max_backoff_secs = 500.;
        let base = 3.;

        let config = BackoffConfig {
            init_backoff: Duration::from_secs_f64(init_backoff_secs),
            max_backoff: Duration::from_secs_f64(max_backoff_secs),
            base,
        };

        let assert_fuzzy_eq = |a: f64, b: f64| assert!((b - a).abs() < 0.0001, "{a} != {b}");

        let rng = Box::new(StepRng::new(0, 0));
        let mut backoff = Backoff::new_with_rng(&config, Some(rng));
        for _ in 0..20 {
            assert_eq!(backoff.next().as_secs_f64(), init_backoff_secs);
        }

        let rng = Box::new(StepRng::new(u64::MAX, 0));
        let mut backoff = Backoff::new_with_rng(&config, Some(rng));
        for i in 0..20 {
            let value = (base.powi(i) * init_backoff_secs).min(max_backoff_secs);
            assert_fuzzy_eq(backoff.next().as_secs_f64(), value);
        }
    }

    #[test]
    fn endpoint_backoff_walks_table_and_caps() {
        let mut b = EndpointBackoff::default();
        let expected = [10, 100, 500, 2000, 10000, 20000, 20000, 20000];
        for ms in expected {
            assert_eq!(b.next_offline_duration(), Duration::from_millis(ms));
        }
        b.reset();
        assert_eq!(b.errors_in_row(), 0);
        assert_eq!(b.next_offline_duration(), Duration::from_millis(10));
    }
}
