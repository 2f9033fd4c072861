//! Sliding-window throttle for outbound search calls.
//!
//! The limiter keeps the timestamp of every call made in the trailing window.
//! Once the window holds `limit` entries the next caller blocks until the
//! oldest entry ages out.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Provider-side budget window.
pub const HOUR: Duration = Duration::from_secs(3600);

/// Monotonic time source the limiter measures and sleeps against.
pub trait Clock: Send {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
    /// Blocks the caller for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by [`Instant`] and [`thread::sleep`].
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Starts measuring from now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Virtual clock: `sleep` advances time instantly. Clones share the same time.
#[derive(Clone, Default)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    /// Clock starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves time forward without sleeping.
    pub fn advance(&self, duration: Duration) {
        self.millis
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Sliding-window call budget.
pub struct SlidingWindowLimiter<C: Clock = SystemClock> {
    window: VecDeque<Duration>,
    limit: usize,
    span: Duration,
    clock: C,
}

impl SlidingWindowLimiter<SystemClock> {
    /// `limit` calls per rolling hour on the wall clock.
    pub fn per_hour(limit: usize) -> Self {
        Self::with_clock(limit, HOUR, SystemClock::new())
    }
}

impl<C: Clock> SlidingWindowLimiter<C> {
    /// Builds a limiter over an arbitrary span and clock. A zero limit is treated as one.
    pub fn with_clock(limit: usize, span: Duration, clock: C) -> Self {
        let limit = limit.max(1);
        Self {
            window: VecDeque::with_capacity(limit),
            limit,
            span,
            clock,
        }
    }

    /// Calls allowed per window.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Calls recorded in the current window.
    pub fn in_window(&mut self) -> usize {
        let now = self.clock.now();
        self.prune(now);
        self.window.len()
    }

    /// Records a call if budget remains, otherwise returns how long to wait.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        let now = self.clock.now();
        self.prune(now);
        if self.window.len() >= self.limit {
            let oldest = self.window.front().copied().unwrap_or(now);
            return Err(self.span.saturating_sub(now.saturating_sub(oldest)));
        }
        self.window.push_back(now);
        Ok(())
    }

    /// Blocks until a call may be made, records it, and returns the time spent waiting.
    pub fn acquire(&mut self) -> Duration {
        let mut waited = Duration::ZERO;
        loop {
            match self.try_acquire() {
                Ok(()) => return waited,
                Err(wait) => {
                    tracing::info!(
                        wait_secs = wait.as_secs_f64(),
                        limit = self.limit,
                        "rate limit reached; waiting for the window to slide"
                    );
                    // A zero wait still has to move the clock past the boundary.
                    let wait = wait.max(Duration::from_millis(1));
                    self.clock.sleep(wait);
                    waited += wait;
                }
            }
        }
    }

    fn prune(&mut self, now: Duration) {
        while let Some(&oldest) = self.window.front() {
            if now.saturating_sub(oldest) >= self.span {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }
}
