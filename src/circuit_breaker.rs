//! Per-endpoint circuit breaker.
//!
//! CLOSED tracks success/failure over a sliding window and opens when
//! the failure rate crosses the threshold (once enough requests were
//! observed). OPEN rejects for `circuit_open_window`, then HALF_OPEN
//! admits periodic trial requests: one success closes the breaker, one
//! failure reopens it.
//!
//! State transitions are CAS-driven so concurrent recorders agree on a
//! single winner; a registered listener observes every transition.

use crate::clock::{Clock, MonotonicClock};
use crate::window::SlidingWindowCounter;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            STATE_CLOSED => CircuitState::Closed,
            STATE_OPEN => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }
}

/// Listener invoked on every state transition.
pub type StateListener = Arc<dyn Fn(CircuitState) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct CircuitBreakerOptions {
    /// Failure rate in [0, 1] that opens the breaker.
    pub failure_rate_threshold: f64,
    /// Minimum observed requests before the rate is meaningful.
    pub minimum_request_threshold: u64,
    /// Window the success/failure counters smooth over.
    pub counter_window: Duration,
    /// How long the breaker stays open before trialing.
    pub circuit_open_window: Duration,
    /// Spacing between half-open trial requests.
    pub trial_request_interval: Duration,
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            minimum_request_threshold: 10,
            counter_window: Duration::from_secs(20),
            circuit_open_window: Duration::from_secs(10),
            trial_request_interval: Duration::from_secs(3),
        }
    }
}

pub struct CircuitBreaker {
    state: AtomicU8,
    opened_at_nanos: AtomicU64,
    last_trial_nanos: AtomicU64,
    successes: SlidingWindowCounter,
    failures: SlidingWindowCounter,
    options: CircuitBreakerOptions,
    clock: Arc<dyn Clock>,
    listener: Mutex<Option<StateListener>>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.state())
            .field("options", &self.options)
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(options: CircuitBreakerOptions) -> Self {
        Self::with_clock(options, Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(options: CircuitBreakerOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: AtomicU8::new(STATE_CLOSED),
            opened_at_nanos: AtomicU64::new(0),
            last_trial_nanos: AtomicU64::new(0),
            successes: SlidingWindowCounter::with_clock(options.counter_window, clock.clone()),
            failures: SlidingWindowCounter::with_clock(options.counter_window, clock.clone()),
            options,
            clock,
            listener: Mutex::new(None),
        }
    }

    /// Register the transition listener, replacing any previous one.
    pub fn set_listener(&self, listener: StateListener) {
        *self.listener.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(listener);
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Whether a request may proceed right now. Drives the OPEN →
    /// HALF_OPEN transition and spaces half-open trials.
    pub fn can_request(&self) -> bool {
        loop {
            match self.state.load(Ordering::Acquire) {
                STATE_CLOSED => return true,
                STATE_OPEN => {
                    let opened_at = self.opened_at_nanos.load(Ordering::Acquire);
                    let now = self.clock.now_nanos();
                    if now.saturating_sub(opened_at)
                        < self.options.circuit_open_window.as_nanos() as u64
                    {
                        return false;
                    }
                    match self.transition(STATE_OPEN, STATE_HALF_OPEN) {
                        Ok(()) => {
                            self.last_trial_nanos.store(now, Ordering::Release);
                            info!("circuit breaker entering half-open");
                            return true;
                        }
                        // Lost the race; re-evaluate the new state.
                        Err(_) => continue,
                    }
                }
                _ => {
                    // Half-open: admit one trial per interval.
                    let last = self.last_trial_nanos.load(Ordering::Acquire);
                    let now = self.clock.now_nanos();
                    if now.saturating_sub(last)
                        < self.options.trial_request_interval.as_nanos() as u64
                    {
                        return false;
                    }
                    if self
                        .last_trial_nanos
                        .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        debug!("circuit breaker admitting half-open trial");
                        return true;
                    }
                    continue;
                }
            }
        }
    }

    pub fn record_success(&self) {
        match self.state.load(Ordering::Acquire) {
            STATE_HALF_OPEN => {
                if self.transition(STATE_HALF_OPEN, STATE_CLOSED).is_ok() {
                    info!("circuit breaker closed after successful trial");
                }
            }
            STATE_CLOSED => {
                self.successes.count(1);
            }
            _ => {}
        }
    }

    pub fn record_failure(&self) {
        match self.state.load(Ordering::Acquire) {
            STATE_HALF_OPEN => {
                if self.transition(STATE_HALF_OPEN, STATE_OPEN).is_ok() {
                    self.opened_at_nanos.store(self.clock.now_nanos(), Ordering::Release);
                    warn!("circuit breaker reopened, trial failed");
                }
            }
            STATE_CLOSED => {
                self.failures.count(1);
                let failures = self.failures.get();
                let total = failures + self.successes.get();
                if total < self.options.minimum_request_threshold {
                    return;
                }
                let rate = failures as f64 / total as f64;
                if rate >= self.options.failure_rate_threshold
                    && self.transition(STATE_CLOSED, STATE_OPEN).is_ok()
                {
                    self.opened_at_nanos.store(self.clock.now_nanos(), Ordering::Release);
                    warn!(
                        failure_rate = rate,
                        observed = total,
                        "circuit breaker opened"
                    );
                }
            }
            _ => {}
        }
    }

    fn transition(&self, from: u8, to: u8) -> Result<(), u8> {
        self.state.compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire).map(|_| {
            // Clone out of the lock so the listener runs unguarded.
            let listener =
                self.listener.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone();
            if let Some(listener) = listener {
                listener(CircuitState::from_raw(to));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::AtomicUsize;

    fn options() -> CircuitBreakerOptions {
        CircuitBreakerOptions {
            failure_rate_threshold: 0.5,
            minimum_request_threshold: 4,
            counter_window: Duration::from_secs(60),
            circuit_open_window: Duration::from_secs(10),
            trial_request_interval: Duration::from_secs(3),
        }
    }

    fn breaker() -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new();
        clock.advance(Duration::from_secs(600));
        (CircuitBreaker::with_clock(options(), Arc::new(clock.clone())), clock)
    }

    fn trip(breaker: &CircuitBreaker) {
        for _ in 0..2 {
            breaker.record_success();
        }
        for _ in 0..2 {
            breaker.record_failure();
        }
    }

    #[test]
    fn stays_closed_below_minimum_requests() {
        let (breaker, _clock) = breaker();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_request());
    }

    #[test]
    fn opens_at_the_failure_rate_threshold() {
        let (breaker, _clock) = breaker();
        trip(&breaker);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_request());
    }

    #[test]
    fn low_failure_rate_stays_closed() {
        let (breaker, _clock) = breaker();
        for _ in 0..9 {
            breaker.record_success();
        }
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_trial_closes_on_success() {
        let (breaker, clock) = breaker();
        trip(&breaker);
        clock.advance(Duration::from_secs(11));

        assert!(breaker.can_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        // A second trial inside the interval is rejected.
        assert!(!breaker.can_request());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_request());
    }

    #[test]
    fn half_open_trial_reopens_on_failure() {
        let (breaker, clock) = breaker();
        trip(&breaker);
        clock.advance(Duration::from_secs(11));
        assert!(breaker.can_request());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_request());

        // The open window restarts from the failed trial.
        clock.advance(Duration::from_secs(11));
        assert!(breaker.can_request());
    }

    #[test]
    fn listener_sees_every_transition() {
        let (breaker, clock) = breaker();
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let sink = transitions.clone();
        breaker.set_listener(Arc::new(move |state| {
            sink.lock().unwrap().push(state);
        }));

        trip(&breaker);
        clock.advance(Duration::from_secs(11));
        assert!(breaker.can_request());
        breaker.record_success();

        assert_eq!(
            *transitions.lock().unwrap(),
            vec![CircuitState::Open, CircuitState::HalfOpen, CircuitState::Closed]
        );
    }

    #[test]
    fn counter_window_forgets_old_failures() {
        let (breaker, clock) = breaker();
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_failure();
        // Let the window slide past the failures entirely.
        clock.advance(Duration::from_secs(120));
        breaker.record_success();
        breaker.record_success();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn concurrent_failures_open_once() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_secs(600));
        let breaker =
            Arc::new(CircuitBreaker::with_clock(options(), Arc::new(clock.clone())));
        let opens = Arc::new(AtomicUsize::new(0));
        let sink = opens.clone();
        breaker.set_listener(Arc::new(move |state| {
            if state == CircuitState::Open {
                sink.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let breaker = breaker.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    breaker.record_failure();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }
}
