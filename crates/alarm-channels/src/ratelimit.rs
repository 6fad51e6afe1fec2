//! Rate limiting: a global token bucket per channel (in-process, via
//! `governor`) plus a per-(imei, channel) limit backed by Redis so the limit
//! is shared across worker instances.
//!
//! Both limiters fail open: if the limiter itself errors (e.g. Redis is
//! down), the send proceeds and the event is logged, rather than blocking
//! delivery on the limiter's own availability.

use alarm_common::Channel;
use dashmap::DashMap;
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use redis::aio::ConnectionManager;
use std::num::NonZeroU32;
use std::sync::Arc;

type GlobalLimiter = RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

pub struct GlobalRateLimits {
    pub sms: u32,
    pub email: u32,
    pub voice: u32,
    pub push: u32,
}

/// Per-channel global limiters plus a Redis connection for the per-device
/// limit. Constructed once at startup.
pub struct RateLimiterSet {
    global: DashMap<Channel, Arc<GlobalLimiter>>,
    redis: Option<ConnectionManager>,
    per_device_window_secs: i64,
    enabled: bool,
}

impl RateLimiterSet {
    pub fn new(limits: GlobalRateLimits, redis: Option<ConnectionManager>, per_device_window_secs: i64, enabled: bool) -> Self {
        let global = DashMap::new();
        global.insert(Channel::Sms, Arc::new(Self::build(limits.sms)));
        global.insert(Channel::Email, Arc::new(Self::build(limits.email)));
        global.insert(Channel::Voice, Arc::new(Self::build(limits.voice)));
        global.insert(Channel::Push, Arc::new(Self::build(limits.push)));

        Self {
            global,
            redis,
            per_device_window_secs,
            enabled,
        }
    }

    fn build(per_minute: u32) -> GlobalLimiter {
        let quota = NonZeroU32::new(per_minute.max(1))
            .map(Quota::per_minute)
            .unwrap_or_else(|| Quota::per_minute(nonzero!(1u32)));
        RateLimiter::direct(quota)
    }

    /// Checks and, if allowed, consumes one unit from both the global and
    /// per-device limiters. Returns `true` if the send should proceed.
    pub async fn check(&self, channel: Channel, imei: &str) -> bool {
        if !self.enabled {
            return true;
        }

        if let Some(limiter) = self.global.get(&channel) {
            if limiter.check().is_err() {
                tracing::debug!(%channel, "global rate limit exceeded");
                return false;
            }
        }

        self.check_per_device(channel, imei).await
    }

    async fn check_per_device(&self, channel: Channel, imei: &str) -> bool {
        let Some(redis) = &self.redis else {
            return true;
        };

        let key = format!("alarm:ratelimit:{imei}:{channel}");
        let mut conn = redis.clone();

        let result: redis::RedisResult<i64> = redis::pipe()
            .atomic()
            .incr(&key, 1)
            .expire(&key, self.per_device_window_secs)
            .ignore()
            .query_async(&mut conn)
            .await;

        match result {
            Ok(count) => count <= 1,
            Err(e) => {
                tracing::warn!(error = %e, "per-device rate limiter unavailable, failing open");
                true
            }
        }
    }
}
