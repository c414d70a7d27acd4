//! The endpoint group: a resolver-backed pool with per-endpoint
//! circuit breakers, age-based refresh, and retry-aware selection.
//!
//! Refresh invariants:
//! - a breaker leaving CLOSED moves its endpoint to `bad` for
//!   `circuit_open_window`; breaker callbacks only schedule a refresh,
//!   they never mutate the pool synchronously,
//! - endpoints age out after `max_endpoint_age` plus up to 20% jitter,
//! - the refresh task wakes at the earliest upcoming expiration,
//!   clamped to at least 500 ms, or in 100 ms while the pool is empty,
//! - new endpoints come from the resolver, excluding current,
//!   recently-aged, and bad endpoints, up to `max_num_endpoints`;
//!   leftover slots readmit recently-aged endpoints still resolved,
//!   with a refreshed age stamp and their breaker state preserved.

use super::resolver::AddressResolver;
use super::Endpoint;
use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::clock::{Clock, MonotonicClock};
use crate::telemetry::{DeliveryEvent, DeliverySink, LogSink};
use arc_swap::ArcSwap;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

pub use crate::circuit_breaker::CircuitBreakerOptions;

/// How selection walks the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionStrategy {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    /// Weighted rotation where fresh endpoints ramp their weight up
    /// over 30 s in 2 s steps.
    RampingUp,
}

#[derive(Debug, Clone)]
pub struct EndpointGroupOptions {
    pub max_num_endpoints: usize,
    pub max_endpoint_age: Duration,
    pub circuit_open_window: Duration,
    pub selection_strategy: SelectionStrategy,
    pub selection_timeout: Duration,
    pub fail_fast_on_all_circuit_open: bool,
    pub breaker: CircuitBreakerOptions,
}

impl Default for EndpointGroupOptions {
    fn default() -> Self {
        Self {
            max_num_endpoints: 4,
            max_endpoint_age: Duration::from_secs(60),
            circuit_open_window: Duration::from_secs(10),
            selection_strategy: SelectionStrategy::RoundRobin,
            selection_timeout: Duration::from_secs(5),
            fail_fast_on_all_circuit_open: true,
            breaker: CircuitBreakerOptions::default(),
        }
    }
}

/// One pooled endpoint with its breaker and age stamp.
#[derive(Debug)]
pub struct EndpointContext {
    pub endpoint: Endpoint,
    pub breaker: Arc<CircuitBreaker>,
    created_at_nanos: u64,
    expires_at_nanos: u64,
}

/// A selection result. Fallback picks from the bad set carry no
/// breaker; outcome recording is a no-op for them.
#[derive(Debug, Clone)]
pub struct SelectedEndpoint {
    pub endpoint: Endpoint,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl SelectedEndpoint {
    pub fn record_success(&self) {
        if let Some(breaker) = &self.breaker {
            breaker.record_success();
        }
    }

    pub fn record_failure(&self) {
        if let Some(breaker) = &self.breaker {
            breaker.record_failure();
        }
    }
}

enum TrySelect {
    Selected(SelectedEndpoint),
    NoEndpoint,
    Wait,
}

pub struct EndpointGroup {
    inner: Arc<GroupInner>,
}

impl std::fmt::Debug for EndpointGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointGroup")
            .field("active", &self.inner.active.load().len())
            .field("options", &self.inner.options)
            .finish()
    }
}

struct GroupInner {
    resolver: Arc<dyn AddressResolver>,
    options: EndpointGroupOptions,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn DeliverySink>,
    active: ArcSwap<Vec<Arc<EndpointContext>>>,
    // Endpoint -> removal deadline. Entries leave after circuit_open_window.
    bad: Mutex<HashMap<Endpoint, u64>>,
    last_resolved: Mutex<Vec<Endpoint>>,
    rotation: AtomicUsize,
    refresh_lock: tokio::sync::Mutex<()>,
    update_notify: Notify,
    refresh_notify: Notify,
    closed: AtomicBool,
}

impl EndpointGroup {
    /// Create the group and start its refresh task. Must be called from
    /// within a tokio runtime.
    pub fn new(resolver: Arc<dyn AddressResolver>, options: EndpointGroupOptions) -> Self {
        Self::with_parts(resolver, options, Arc::new(MonotonicClock::default()), Arc::new(LogSink))
    }

    pub fn with_parts(
        resolver: Arc<dyn AddressResolver>,
        options: EndpointGroupOptions,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn DeliverySink>,
    ) -> Self {
        let inner = Arc::new(GroupInner {
            resolver,
            options,
            clock,
            sink,
            active: ArcSwap::from_pointee(Vec::new()),
            bad: Mutex::new(HashMap::new()),
            last_resolved: Mutex::new(Vec::new()),
            rotation: AtomicUsize::new(0),
            refresh_lock: tokio::sync::Mutex::new(()),
            update_notify: Notify::new(),
            refresh_notify: Notify::new(),
            closed: AtomicBool::new(false),
        });
        tokio::spawn(GroupInner::run(Arc::clone(&inner)));
        Self { inner }
    }

    /// Force a refresh and wait for it to complete.
    pub async fn refresh_now(&self) {
        self.inner.refresh_once().await;
    }

    /// Snapshot of the active contexts.
    pub fn snapshot(&self) -> Vec<Arc<EndpointContext>> {
        self.inner.active.load().iter().cloned().collect()
    }

    /// Endpoints currently quarantined by an open breaker.
    pub fn bad_endpoints(&self) -> Vec<Endpoint> {
        self.inner.bad.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).keys().cloned().collect()
    }

    /// Select an endpoint, skipping `used` (endpoints consumed by
    /// sibling attempts of the same request) for up to 3 alternatives
    /// before falling back to reuse. Waits for a pool update, bounded
    /// by `selection_timeout`, while no endpoint is available.
    pub async fn select(&self, used: &[Endpoint]) -> Option<SelectedEndpoint> {
        let deadline = tokio::time::Instant::now() + self.inner.options.selection_timeout;
        loop {
            let notified = self.inner.update_notify.notified();
            match self.inner.try_select(used) {
                TrySelect::Selected(selected) => return Some(selected),
                TrySelect::NoEndpoint => return None,
                TrySelect::Wait => {}
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Stop the refresh task. Idempotent.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.refresh_notify.notify_waiters();
        self.inner.update_notify.notify_waiters();
    }
}

impl Drop for EndpointGroup {
    fn drop(&mut self) {
        self.close();
    }
}

impl GroupInner {
    async fn run(inner: Arc<GroupInner>) {
        while !inner.closed.load(Ordering::Acquire) {
            inner.refresh_once().await;
            let delay = inner.next_refresh_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = inner.refresh_notify.notified() => {}
            }
        }
        debug!("endpoint group refresh task stopped");
    }

    async fn refresh_once(self: &Arc<Self>) {
        let _guard = self.refresh_lock.lock().await;
        let now = self.clock.now_nanos();

        {
            let mut bad = self.bad.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            bad.retain(|_, deadline| *deadline > now);
        }

        let resolved = match self.resolver.resolve().await {
            Ok(resolved) => {
                *self.last_resolved.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) =
                    resolved.clone();
                resolved
            }
            Err(err) => {
                warn!(%err, "endpoint resolution failed, keeping previous list");
                self.last_resolved.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
            }
        };

        let snapshot = self.active.load_full();
        let mut kept: Vec<Arc<EndpointContext>> = Vec::new();
        let mut recently_aged: Vec<Arc<EndpointContext>> = Vec::new();
        for context in snapshot.iter() {
            if context.breaker.state() != CircuitState::Closed {
                let deadline = now + self.options.circuit_open_window.as_nanos() as u64;
                self.bad
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .insert(context.endpoint.clone(), deadline);
                self.sink.record(&DeliveryEvent::EndpointEvicted {
                    endpoint: context.endpoint.clone(),
                });
            } else if context.expires_at_nanos <= now {
                recently_aged.push(Arc::clone(context));
            } else {
                kept.push(Arc::clone(context));
            }
        }

        let current: HashSet<&Endpoint> = kept.iter().map(|c| &c.endpoint).collect();
        let aged_set: HashSet<&Endpoint> = recently_aged.iter().map(|c| &c.endpoint).collect();
        let bad_set: HashSet<Endpoint> = self
            .bad
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();

        let mut additions: Vec<Arc<EndpointContext>> = Vec::new();
        for endpoint in &resolved {
            if kept.len() + additions.len() >= self.options.max_num_endpoints {
                break;
            }
            if current.contains(endpoint)
                || aged_set.contains(endpoint)
                || bad_set.contains(endpoint)
                || additions.iter().any(|c| &c.endpoint == endpoint)
            {
                continue;
            }
            additions.push(self.new_context(endpoint.clone(), now));
            self.sink.record(&DeliveryEvent::EndpointAdded { endpoint: endpoint.clone() });
        }

        // Leftover slots readmit recently-aged endpoints the resolver
        // still lists, keeping their breaker state.
        for context in recently_aged {
            if kept.len() + additions.len() >= self.options.max_num_endpoints {
                break;
            }
            if resolved.contains(&context.endpoint) {
                additions.push(Arc::new(EndpointContext {
                    endpoint: context.endpoint.clone(),
                    breaker: Arc::clone(&context.breaker),
                    created_at_nanos: context.created_at_nanos,
                    expires_at_nanos: self.jittered_expiration(now),
                }));
                debug!(endpoint = %context.endpoint, "readmitted aged endpoint");
            }
        }

        let changed = kept.len() != snapshot.len() || !additions.is_empty();
        kept.extend(additions);
        self.active.store(Arc::new(kept));
        if changed {
            self.update_notify.notify_waiters();
        }
    }

    fn new_context(self: &Arc<Self>, endpoint: Endpoint, now: u64) -> Arc<EndpointContext> {
        let breaker = Arc::new(CircuitBreaker::with_clock(
            self.options.breaker.clone(),
            Arc::clone(&self.clock),
        ));
        let context = Arc::new(EndpointContext {
            endpoint: endpoint.clone(),
            breaker: Arc::clone(&breaker),
            created_at_nanos: now,
            expires_at_nanos: self.jittered_expiration(now),
        });
        // The callback only schedules a refresh; eviction happens on
        // the refresh task. Weak, because contexts hold the breaker
        // which holds this listener.
        let weak: Weak<GroupInner> = Arc::downgrade(self);
        let event_endpoint = endpoint;
        breaker.set_listener(Arc::new(move |state| {
            if let Some(inner) = weak.upgrade() {
                inner
                    .sink
                    .record(&DeliveryEvent::BreakerStateChanged {
                        endpoint: event_endpoint.clone(),
                        state,
                    });
                if state != CircuitState::Closed {
                    inner.refresh_notify.notify_one();
                }
            }
        }));
        context
    }

    fn jittered_expiration(&self, now: u64) -> u64 {
        let age = self.options.max_endpoint_age.as_nanos() as u64;
        let jitter_cap = age / 5;
        let jitter =
            if jitter_cap == 0 { 0 } else { rand::rng().random_range(0..=jitter_cap) };
        now + age + jitter
    }

    fn next_refresh_delay(&self) -> Duration {
        let snapshot = self.active.load();
        if snapshot.is_empty() {
            return Duration::from_millis(100);
        }
        let now = self.clock.now_nanos();
        let mut earliest =
            snapshot.iter().map(|c| c.expires_at_nanos).min().unwrap_or(u64::MAX);
        if let Some(bad_min) = self
            .bad
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .min()
        {
            earliest = earliest.min(*bad_min);
        }
        Duration::from_nanos(earliest.saturating_sub(now)).max(Duration::from_millis(500))
    }

    fn try_select(&self, used: &[Endpoint]) -> TrySelect {
        let snapshot = self.active.load_full();
        if !snapshot.is_empty() {
            // Skip endpoints consumed by sibling attempts, and endpoints
            // whose breaker rejects the request (readmitted contexts may
            // carry a non-closed breaker awaiting its trial).
            let alternatives = snapshot.len().min(3);
            for _ in 0..alternatives {
                let context = self.next_by_strategy(&snapshot);
                if !used.contains(&context.endpoint) && context.breaker.can_request() {
                    return TrySelect::Selected(SelectedEndpoint {
                        endpoint: context.endpoint.clone(),
                        breaker: Some(Arc::clone(&context.breaker)),
                    });
                }
            }
            let context = self.next_by_strategy(&snapshot);
            return TrySelect::Selected(SelectedEndpoint {
                endpoint: context.endpoint.clone(),
                breaker: Some(Arc::clone(&context.breaker)),
            });
        }

        let bad_nonempty =
            !self.bad.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).is_empty();
        if bad_nonempty {
            if self.options.fail_fast_on_all_circuit_open {
                return TrySelect::NoEndpoint;
            }
            if let Some(selected) = self.pick_bad_fallback() {
                return TrySelect::Selected(selected);
            }
        }
        TrySelect::Wait
    }

    /// Random pick from the bad set, preferring endpoints the resolver
    /// still lists. The chosen endpoint may be removed concurrently by
    /// the refresh task, so a failed membership re-check re-picks once.
    fn pick_bad_fallback(&self) -> Option<SelectedEndpoint> {
        for _ in 0..2 {
            let candidate = {
                let bad = self.bad.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if bad.is_empty() {
                    return None;
                }
                let resolved =
                    self.last_resolved.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                let visible: Vec<&Endpoint> =
                    bad.keys().filter(|endpoint| resolved.contains(endpoint)).collect();
                let pool: Vec<&Endpoint> =
                    if visible.is_empty() { bad.keys().collect() } else { visible };
                pool[rand::rng().random_range(0..pool.len())].clone()
            };
            let still_bad = self
                .bad
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .contains_key(&candidate);
            if still_bad {
                return Some(SelectedEndpoint { endpoint: candidate, breaker: None });
            }
        }
        None
    }

    fn next_by_strategy(&self, snapshot: &[Arc<EndpointContext>]) -> Arc<EndpointContext> {
        match self.options.selection_strategy {
            SelectionStrategy::RoundRobin => {
                let index = self.rotation.fetch_add(1, Ordering::Relaxed) % snapshot.len();
                Arc::clone(&snapshot[index])
            }
            SelectionStrategy::WeightedRoundRobin => {
                let weights: Vec<u64> =
                    snapshot.iter().map(|c| u64::from(c.endpoint.weight.max(1))).collect();
                self.pick_weighted(snapshot, &weights)
            }
            SelectionStrategy::RampingUp => {
                let now = self.clock.now_nanos();
                let weights: Vec<u64> = snapshot
                    .iter()
                    .map(|c| ramped_weight(c.endpoint.weight, now.saturating_sub(c.created_at_nanos)))
                    .collect();
                self.pick_weighted(snapshot, &weights)
            }
        }
    }

    fn pick_weighted(
        &self,
        snapshot: &[Arc<EndpointContext>],
        weights: &[u64],
    ) -> Arc<EndpointContext> {
        let total: u64 = weights.iter().sum::<u64>().max(1);
        let mut tick = self.rotation.fetch_add(1, Ordering::Relaxed) as u64 % total;
        for (context, weight) in snapshot.iter().zip(weights) {
            if tick < *weight {
                return Arc::clone(context);
            }
            tick -= weight;
        }
        Arc::clone(&snapshot[0])
    }

}

/// Ramp a weight up over 30 s in 2 s steps.
fn ramped_weight(weight: u32, age_nanos: u64) -> u64 {
    const STEP: u64 = 2_000_000_000;
    const STEPS_TO_FULL: u64 = 15;
    let steps = (age_nanos / STEP) + 1;
    let factor = steps.min(STEPS_TO_FULL);
    (u64::from(weight.max(1)) * factor / STEPS_TO_FULL).max(1)
}
