//! Client-side rate limiting for analysis submissions.
//!
//! Backed by a direct (un-keyed) `governor` limiter. A quota of
//! `max_requests` per `window` allows a burst of `max_requests` and then
//! replenishes one slot every `window / max_requests`.

use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;
use std::num::NonZeroU32;
use std::time::Duration;

type DirectLimiter<C> =
    governor::RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

pub struct RateLimiter<C: Clock = DefaultClock> {
    limiter: DirectLimiter<C>,
    clock: C,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self::with_clock(max_requests, window, DefaultClock::default())
    }
}

impl<C: Clock + Clone> RateLimiter<C> {
    pub fn with_clock(max_requests: usize, window: Duration, clock: C) -> Self {
        Self {
            limiter: governor::RateLimiter::direct_with_clock(
                quota(max_requests, window),
                clock.clone(),
            ),
            clock,
        }
    }

    /// Take a slot, or return how long until one frees up.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }
}

fn quota(max_requests: usize, window: Duration) -> Quota {
    let burst = NonZeroU32::new(u32::try_from(max_requests).unwrap_or(u32::MAX))
        .unwrap_or(NonZeroU32::MIN);
    Quota::with_period(window / burst.get())
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}
