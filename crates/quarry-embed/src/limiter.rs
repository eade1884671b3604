//! Windowed embedding rate limiter.
//!
//! Three rolling windows per process: requests per minute, tokens per
//! minute, and tokens per day. Admission is serialized through a single
//! fair mutex so callers are admitted in arrival order and a sleeping
//! head-of-line waiter prevents thundering.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use quarry_core::defaults;

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(86_400);

/// Window quotas for the limiter.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub requests_per_minute: u64,
    pub tokens_per_minute: u64,
    pub tokens_per_day: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: defaults::EMBED_RPM,
            tokens_per_minute: defaults::EMBED_TPM,
            tokens_per_day: defaults::EMBED_TPD,
        }
    }
}

#[derive(Debug)]
struct Windows {
    minute_start: Instant,
    minute_requests: u64,
    minute_tokens: u64,
    day_start: Instant,
    day_tokens: u64,
}

impl Windows {
    fn new(now: Instant) -> Self {
        Self {
            minute_start: now,
            minute_requests: 0,
            minute_tokens: 0,
            day_start: now,
            day_tokens: 0,
        }
    }

    /// Advance window starts by whole window lengths, resetting counters.
    fn roll(&mut self, now: Instant) {
        let minute_elapsed = now.duration_since(self.minute_start);
        if minute_elapsed >= MINUTE {
            let windows = minute_elapsed.as_secs() / MINUTE.as_secs();
            self.minute_start += MINUTE * windows.min(u32::MAX as u64) as u32;
            self.minute_requests = 0;
            self.minute_tokens = 0;
        }
        let day_elapsed = now.duration_since(self.day_start);
        if day_elapsed >= DAY {
            let windows = day_elapsed.as_secs() / DAY.as_secs();
            self.day_start += DAY * windows.min(u32::MAX as u64) as u32;
            self.day_tokens = 0;
        }
    }

    /// Whether admitting `(requests, tokens)` would overshoot no window.
    ///
    /// A cost larger than a whole window is admitted alone into an empty
    /// window; it would otherwise never be admitted.
    fn admits(&self, requests: u64, tokens: u64, config: &RateLimitConfig) -> bool {
        let requests_ok = self.minute_requests + requests <= config.requests_per_minute
            || self.minute_requests == 0;
        let minute_tokens_ok =
            self.minute_tokens + tokens <= config.tokens_per_minute || self.minute_tokens == 0;
        let day_tokens_ok = self.day_tokens + tokens <= config.tokens_per_day || self.day_tokens == 0;
        requests_ok && minute_tokens_ok && day_tokens_ok
    }

    /// The earliest instant at which every violated window will have rolled.
    fn next_eligible(&self, requests: u64, tokens: u64, config: &RateLimitConfig) -> Instant {
        let mut wake = self.minute_start + MINUTE;
        let minute_blocked = (self.minute_requests + requests > config.requests_per_minute
            && self.minute_requests > 0)
            || (self.minute_tokens + tokens > config.tokens_per_minute && self.minute_tokens > 0);
        let day_blocked = self.day_tokens + tokens > config.tokens_per_day && self.day_tokens > 0;

        if day_blocked {
            let day_wake = self.day_start + DAY;
            if !minute_blocked || day_wake > wake {
                wake = day_wake;
            }
        }
        wake
    }

    fn admit(&mut self, requests: u64, tokens: u64) {
        self.minute_requests += requests;
        self.minute_tokens += tokens;
        self.day_tokens += tokens;
    }
}

/// In-process windowed limiter.
///
/// Constructed once per process and injected; distributed coordination is a
/// separate acquire step composed in front of this one.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<Windows>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(Windows::new(Instant::now())),
        }
    }

    /// Block until admitting `(requests, tokens)` would not overshoot any
    /// window, then admit by incrementing all three counters.
    ///
    /// The tokio mutex is fair, so concurrent callers admit in arrival
    /// order; the head waiter holds the lock while it sleeps.
    pub async fn acquire(&self, requests: u64, tokens: u64) {
        let mut windows = self.windows.lock().await;
        loop {
            let now = Instant::now();
            windows.roll(now);
            if windows.admits(requests, tokens, &self.config) {
                windows.admit(requests, tokens);
                trace!(
                    subsystem = "embed",
                    component = "limiter",
                    op = "acquire",
                    requests,
                    tokens,
                    minute_requests = windows.minute_requests,
                    minute_tokens = windows.minute_tokens,
                    "Admitted"
                );
                return;
            }

            let wake = windows.next_eligible(requests, tokens, &self.config);
            debug!(
                subsystem = "embed",
                component = "limiter",
                op = "wait",
                requests,
                tokens,
                wait_ms = wake.saturating_duration_since(now).as_millis() as u64,
                "Window exhausted, waiting for rollover"
            );
            tokio::time::sleep_until(wake).await;
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}
