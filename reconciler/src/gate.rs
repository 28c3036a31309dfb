//! Admission control for upstream calls.
//!
//! `ConcurrencyGate` bounds how many calls run at once with a fair semaphore,
//! spaces call starts with a token bucket `Pacer` and bounds every call with
//! a timeout. All three apply to every call that goes through `run`.

use crate::config::GateConfig;
use crate::metrics_defs::{GATE_INFLIGHT, GATE_WAIT_DURATION, UPSTREAM_DURATION};
use crate::upstream::UpstreamError;
use parking_lot::Mutex;
use shared::{gauge, histogram};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// Token bucket holding up to `burst` call starts, refilled at one token per
/// `interval`. Callers reserve a token before starting and may drive the
/// bucket negative, in which case they wait until their token would have been
/// refilled. Reservations are served in the order they are made.
pub struct Pacer {
    interval: Duration,
    burst: f64,
    bucket: Mutex<Bucket>,
}

struct Bucket {
    tokens: f64,
    updated: Instant,
}

impl Pacer {
    pub fn new(interval: Duration, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Pacer {
            interval,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                updated: Instant::now(),
            }),
        }
    }

    pub fn per_minute(requests_per_minute: u32, burst: u32) -> Self {
        let interval = Duration::from_secs(60) / requests_per_minute.max(1);
        Self::new(interval, burst)
    }

    /// Takes one token and returns how long the caller has to wait before
    /// starting its call.
    pub fn reserve(&self) -> Duration {
        let mut bucket = self.bucket.lock();
        let now = Instant::now();

        let refilled = now.duration_since(bucket.updated).as_secs_f64() / self.interval.as_secs_f64();
        bucket.tokens = (bucket.tokens + refilled).min(self.burst);
        bucket.updated = now;
        bucket.tokens -= 1.0;

        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            self.interval.mul_f64(-bucket.tokens)
        }
    }

    pub async fn wait(&self) {
        let delay = self.reserve();
        if !delay.is_zero() {
            tracing::debug!(delay_ms = delay.as_millis() as u64, "pacing upstream call");
            tokio::time::sleep(delay).await;
        }
    }
}

/// Gauge guard for the number of calls holding a permit.
struct Inflight;

impl Inflight {
    fn enter() -> Self {
        gauge!(GATE_INFLIGHT).increment(1.0);
        Inflight
    }
}

impl Drop for Inflight {
    fn drop(&mut self) {
        gauge!(GATE_INFLIGHT).decrement(1.0);
    }
}

#[derive(Clone)]
pub struct ConcurrencyGate {
    permits: Arc<Semaphore>,
    max_permits: usize,
    pacer: Option<Arc<Pacer>>,
    call_timeout: Duration,
}

impl ConcurrencyGate {
    pub fn new(max_permits: usize, call_timeout: Duration) -> Self {
        ConcurrencyGate {
            permits: Arc::new(Semaphore::new(max_permits)),
            max_permits,
            pacer: None,
            call_timeout,
        }
    }

    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = Some(Arc::new(pacer));
        self
    }

    pub fn from_config(config: &GateConfig, call_timeout: Duration) -> Self {
        Self::new(config.max_permits, call_timeout).with_pacer(Pacer::per_minute(
            config.requests_per_minute,
            config.burst,
        ))
    }

    pub fn max_permits(&self) -> usize {
        self.max_permits
    }

    /// Permits not currently held by a call.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Runs `call` once a permit and a pacing slot are available. The permit
    /// is held until the call finishes, fails, times out or panics.
    pub async fn run<F, T>(&self, call: F) -> Result<T, UpstreamError>
    where
        F: Future<Output = Result<T, UpstreamError>>,
    {
        let queued = Instant::now();
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| UpstreamError::Transport("concurrency gate closed".into()))?;
        if let Some(pacer) = &self.pacer {
            pacer.wait().await;
        }
        histogram!(GATE_WAIT_DURATION).record(queued.elapsed().as_secs_f64());

        let _inflight = Inflight::enter();
        let started = Instant::now();
        let result = match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout(self.call_timeout)),
        };
        histogram!(UPSTREAM_DURATION).record(started.elapsed().as_secs_f64());

        result
    }
}
