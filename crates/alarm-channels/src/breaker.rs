//! Per-channel circuit breaker.
//!
//! Three states: closed (normal), open (failing fast), half-open (a single
//! probe request is allowed through to test recovery). Only failures
//! classified as [`ErrorKind::Retryable`] count toward tripping the
//! breaker — rate limits and permanent/validation failures do not.

use alarm_common::{BreakerState, Channel, CircuitBreakerSnapshot, ErrorKind};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

struct Breaker {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    opened_at: Mutex<Option<Instant>>,
    opened_at_wall: Mutex<Option<DateTime<Utc>>>,
    half_open_probe_in_flight: AtomicU8,
    failure_threshold: u32,
    cool_down: Duration,
}

impl Breaker {
    fn new(failure_threshold: u32, cool_down: Duration) -> Self {
        Self {
            state: AtomicU8::new(STATE_CLOSED),
            consecutive_failures: AtomicU32::new(0),
            opened_at: Mutex::new(None),
            opened_at_wall: Mutex::new(None),
            half_open_probe_in_flight: AtomicU8::new(0),
            failure_threshold,
            cool_down,
        }
    }

    fn allow_request(&self) -> bool {
        match self.state.load(Ordering::SeqCst) {
            STATE_CLOSED => true,
            STATE_OPEN => {
                let elapsed = self.opened_at.lock().map(|t| t.elapsed()).unwrap_or(Duration::MAX);
                if elapsed >= self.cool_down {
                    // Transition to half-open; only the winner of this CAS
                    // gets to send the probe.
                    if self
                        .state
                        .compare_exchange(STATE_OPEN, STATE_HALF_OPEN, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        self.half_open_probe_in_flight.store(0, Ordering::SeqCst);
                    }
                    self.try_take_half_open_slot()
                } else {
                    false
                }
            }
            STATE_HALF_OPEN => self.try_take_half_open_slot(),
            _ => true,
        }
    }

    fn try_take_half_open_slot(&self) -> bool {
        self.half_open_probe_in_flight
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.state.store(STATE_CLOSED, Ordering::SeqCst);
        *self.opened_at.lock() = None;
        *self.opened_at_wall.lock() = None;
        self.half_open_probe_in_flight.store(0, Ordering::SeqCst);
    }

    fn record_failure(&self) {
        if self.state.load(Ordering::SeqCst) == STATE_HALF_OPEN {
            self.trip();
            return;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.failure_threshold {
            self.trip();
        }
    }

    fn trip(&self) {
        self.state.store(STATE_OPEN, Ordering::SeqCst);
        *self.opened_at.lock() = Some(Instant::now());
        *self.opened_at_wall.lock() = Some(Utc::now());
        self.half_open_probe_in_flight.store(0, Ordering::SeqCst);
    }

    fn force_reset(&self) {
        self.record_success();
    }

    fn state_enum(&self) -> BreakerState {
        match self.state.load(Ordering::SeqCst) {
            STATE_CLOSED => BreakerState::Closed,
            STATE_OPEN => BreakerState::Open,
            _ => BreakerState::HalfOpen,
        }
    }
}

/// One breaker per channel, keyed statically since `Channel` is a small enum.
pub struct CircuitBreakerSet {
    breakers: DashMap<Channel, Arc<Breaker>>,
    failure_threshold: u32,
    cool_down: Duration,
}

impl CircuitBreakerSet {
    pub fn new(failure_threshold: u32, cool_down_secs: u64) -> Self {
        let breakers = DashMap::new();
        let cool_down = Duration::from_secs(cool_down_secs);
        for channel in Channel::ALL {
            breakers.insert(channel, Arc::new(Breaker::new(failure_threshold, cool_down)));
        }
        Self {
            breakers,
            failure_threshold,
            cool_down,
        }
    }

    fn get(&self, channel: Channel) -> Arc<Breaker> {
        self.breakers
            .entry(channel)
            .or_insert_with(|| Arc::new(Breaker::new(self.failure_threshold, self.cool_down)))
            .clone()
    }

    pub fn allow_request(&self, channel: Channel) -> bool {
        self.get(channel).allow_request()
    }

    /// Records the outcome of an adapter call. Only `ErrorKind::Retryable`
    /// failures count against the breaker; everything else (rate limit,
    /// permanent/invalid-recipient) is treated like a success from the
    /// breaker's point of view since the provider itself is reachable.
    pub fn record_outcome(&self, channel: Channel, success: bool, error_kind: Option<ErrorKind>) {
        let breaker = self.get(channel);
        if success {
            breaker.record_success();
            return;
        }
        match error_kind {
            Some(kind) if kind.trips_breaker() => breaker.record_failure(),
            _ => breaker.record_success(),
        }
    }

    pub fn force_reset(&self, channel: Channel) {
        self.get(channel).force_reset();
    }

    pub fn snapshot(&self, channel: Channel) -> CircuitBreakerSnapshot {
        let breaker = self.get(channel);
        let opened_at = *breaker.opened_at_wall.lock();
        CircuitBreakerSnapshot {
            channel,
            state: breaker.state_enum(),
            consecutive_failures: breaker.consecutive_failures.load(Ordering::SeqCst),
            opened_at,
        }
    }

    pub fn snapshot_all(&self) -> Vec<CircuitBreakerSnapshot> {
        Channel::ALL.iter().map(|c| self.snapshot(*c)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_breaker_trips_after_threshold() {
        let breaker = Breaker::new(3, Duration::from_secs(60));
        assert!(breaker.allow_request());
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.allow_request());
        breaker.record_failure();
        assert_eq!(breaker.state_enum(), BreakerState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn test_circuit_breaker_resets_on_success() {
        let breaker = Breaker::new(2, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.consecutive_failures.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.state_enum(), BreakerState::Closed);
    }

    #[test]
    fn test_non_retryable_failure_does_not_trip() {
        let breaker = Breaker::new(1, Duration::from_secs(60));
        let set = CircuitBreakerSet::new(1, 60);
        set.record_outcome(Channel::Sms, false, Some(ErrorKind::RateLimited));
        assert_eq!(set.snapshot(Channel::Sms).state, BreakerState::Closed);
        let _ = breaker;
    }
}
