//! RateLimiter (spec §4.6): per-connection token buckets, strike counters,
//! and progressive bans. All state is process-wide, in-memory, and does not
//! survive restarts.

use crate::common::config::RateLimitConfig;
use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Event,
    Request,
}

struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, refill_per_sec: u32) -> Self {
        Self {
            tokens: capacity as f64,
            capacity: capacity as f64,
            refill_per_sec: refill_per_sec as f64,
            last_refill: Instant::now(),
        }
    }

    fn try_take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

struct ConnectionState {
    event_bucket: TokenBucket,
    request_bucket: TokenBucket,
    strikes: u32,
    strikes_window_start: Instant,
    ban_count: u32,
}

struct Ban {
    until: Instant,
}

/// Per-connection / per-pubkey rate limiting state (spec §4.6).
pub struct RateLimiter {
    config: RateLimitConfig,
    connections: DashMap<String, ConnectionState>,
    bans: DashMap<String, Ban>,
}

const STRIKE_WINDOW: Duration = Duration::from_secs(60);

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            connections: DashMap::new(),
            bans: DashMap::new(),
        }
    }

    /// Whether `identity` (remote addr or authenticated pubkey) is currently banned.
    pub fn is_banned(&self, identity: &str) -> bool {
        match self.bans.get(identity) {
            Some(ban) => Instant::now() < ban.until,
            None => false,
        }
    }

    /// Tries to take one token of `kind` for `identity`. Returns `false` and
    /// records a strike (possibly imposing a ban) when the bucket is empty.
    pub fn check(&self, identity: &str, kind: Kind) -> bool {
        if !self.config.enabled {
            return true;
        }
        if self.is_banned(identity) {
            return false;
        }

        let mut state = self.connections.entry(identity.to_string()).or_insert_with(|| ConnectionState {
            event_bucket: TokenBucket::new(self.config.burst_size, self.config.max_events_per_second),
            request_bucket: TokenBucket::new(self.config.burst_size, self.config.max_requests_per_second),
            strikes: 0,
            strikes_window_start: Instant::now(),
            ban_count: 0,
        });

        let allowed = match kind {
            Kind::Event => state.event_bucket.try_take(),
            Kind::Request => state.request_bucket.try_take(),
        };

        if allowed {
            return true;
        }

        self.strike(identity, &mut state);
        false
    }

    fn strike(&self, identity: &str, state: &mut ConnectionState) {
        if state.strikes_window_start.elapsed() > STRIKE_WINDOW {
            state.strikes = 0;
            state.strikes_window_start = Instant::now();
        }
        state.strikes += 1;

        if state.strikes >= self.config.ban_threshold {
            state.strikes = 0;
            let duration = if self.config.progressive_ban {
                let doubled = self.config.ban_duration_secs.saturating_mul(1u64 << state.ban_count.min(16));
                doubled.min(self.config.max_ban_duration_secs)
            } else {
                self.config.ban_duration_secs
            };
            state.ban_count += 1;
            self.bans.insert(
                identity.to_string(),
                Ban { until: Instant::now() + Duration::from_secs(duration) },
            );
            tracing::info!(identity, duration_secs = duration, "connection banned for exceeding rate limits");
        }
    }

    /// Removes expired bans. Run periodically by a background sweeper
    /// (spec §4.6, default every `BAN_SWEEP_INTERVAL_SECS`).
    pub fn sweep_expired_bans(&self) {
        let now = Instant::now();
        self.bans.retain(|_, ban| ban.until > now);
    }

    pub fn drop_connection(&self, identity: &str) {
        self.connections.remove(identity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            max_events_per_second: 1,
            max_requests_per_second: 1,
            burst_size: 1,
            ban_threshold: 2,
            progressive_ban: true,
            ban_duration_secs: 1,
            max_ban_duration_secs: 4,
        }
    }

    #[test]
    fn exhausts_bucket_then_recovers_on_refill() {
        let rl = RateLimiter::new(config());
        assert!(rl.check("conn1", Kind::Event));
        assert!(!rl.check("conn1", Kind::Event));
    }

    #[test]
    fn bans_after_threshold_strikes() {
        let rl = RateLimiter::new(config());
        assert!(rl.check("conn1", Kind::Event));
        assert!(!rl.check("conn1", Kind::Event)); // strike 1
        assert!(!rl.check("conn1", Kind::Event)); // strike 2 -> ban
        assert!(rl.is_banned("conn1"));
    }

    #[test]
    fn disabled_limiter_always_allows() {
        let mut c = config();
        c.enabled = false;
        let rl = RateLimiter::new(c);
        for _ in 0..100 {
            assert!(rl.check("conn1", Kind::Event));
        }
    }
}
