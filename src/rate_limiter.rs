//! Lock-free token-bucket pacing for provider calls.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Tokens are tracked in milli-token units so fractional refill amounts
/// between CAS attempts don't get rounded away.
const MILLI: f64 = 1000.0;

pub struct RateLimiter {
    permits_per_second: f64,
    burst_tokens_milli: u64,
    tokens_milli: AtomicU64,
    last_refill_nanos: AtomicI64,
}

impl RateLimiter {
    /// `permits_per_second` must be positive. `burst_seconds` sets the
    /// bucket capacity as `permits_per_second * burst_seconds` tokens.
    pub fn new(permits_per_second: f64, burst_seconds: f64) -> Self {
        let burst_tokens_milli = (permits_per_second * burst_seconds * MILLI).round() as u64;
        Self {
            permits_per_second,
            burst_tokens_milli,
            tokens_milli: AtomicU64::new(burst_tokens_milli),
            last_refill_nanos: AtomicI64::new(0),
        }
    }

    /// Calls per minute, as reported by a `MarketDataProvider::rate_limit`.
    pub fn from_calls_per_minute(calls_per_minute: u32) -> Self {
        Self::new(f64::from(calls_per_minute) / 60.0, 1.0)
    }

    fn refill(&self, now_nanos: i64) {
        let last = self.last_refill_nanos.load(Ordering::Acquire);
        if last == 0 {
            self.last_refill_nanos.store(now_nanos, Ordering::Release);
            return;
        }
        let elapsed_nanos = (now_nanos - last).max(0);
        let refill_milli = (elapsed_nanos as f64 / 1e9) * self.permits_per_second * MILLI;
        if refill_milli < 1.0 {
            return;
        }
        if self
            .last_refill_nanos
            .compare_exchange(last, now_nanos, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let refill_milli = refill_milli.round() as u64;
            self.tokens_milli
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |tokens| {
                    Some((tokens + refill_milli).min(self.burst_tokens_milli))
                })
                .ok();
        }
    }

    fn try_take(&self, n: u64) -> bool {
        let needed_milli = n * u64::from(MILLI as u32);
        self.tokens_milli
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |tokens| {
                if tokens >= needed_milli {
                    Some(tokens - needed_milli)
                } else {
                    None
                }
            })
            .is_ok()
    }

    fn wait_nanos_for(&self, n: u64) -> i64 {
        let needed_milli = n as f64 * MILLI;
        let have_milli = self.tokens_milli.load(Ordering::Acquire) as f64;
        let deficit_milli = (needed_milli - have_milli).max(0.0);
        ((deficit_milli / MILLI) / self.permits_per_second * 1e9) as i64
    }

    /// Acquire `n` permits, waiting as needed. Spin-waits below 1ms of
    /// required delay, otherwise sleeps on the async runtime.
    pub async fn acquire(&self, n: u64, now_nanos_fn: impl Fn() -> i64) {
        loop {
            self.refill(now_nanos_fn());
            if self.try_take(n) {
                return;
            }
            let wait_nanos = self.wait_nanos_for(n);
            if wait_nanos <= 1_000_000 {
                std::hint::spin_loop();
            } else {
                tokio::time::sleep(Duration::from_nanos(wait_nanos as u64)).await;
            }
        }
    }

    /// Like [`Self::acquire`] but gives up after `timeout`, returning
    /// `false` if the required wait exceeds it.
    pub async fn try_acquire(&self, n: u64, timeout: Duration, now_nanos_fn: impl Fn() -> i64) -> bool {
        self.refill(now_nanos_fn());
        if self.try_take(n) {
            return true;
        }
        let wait_nanos = self.wait_nanos_for(n);
        if wait_nanos as u128 > timeout.as_nanos() {
            return false;
        }
        if wait_nanos <= 1_000_000 {
            std::hint::spin_loop();
        } else {
            tokio::time::sleep(Duration::from_nanos(wait_nanos as u64)).await;
        }
        self.refill(now_nanos_fn());
        self.try_take(n)
    }

    pub fn available_tokens(&self) -> f64 {
        self.tokens_milli.load(Ordering::Acquire) as f64 / MILLI
    }
}
