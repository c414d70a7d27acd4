//! The retry decision engine.
//!
//! A retry decision per attempt combines, in strict priority order:
//!
//! 1. the retry-rate gate backed by two sliding-window counters,
//! 2. the `Retry-After` strategy,
//! 3. the first matching per-status option,
//! 4. the active policy set.
//!
//! If no rule mandates a retry the call terminates with the last
//! result. Attempts are capped at the resolved `max_attempts`; a
//! resolved plan also carries the per-attempt timeout the dispatcher
//! enforces around each attempt.

use super::options::{RetryAfterStrategy, RetryOptions, RetryPolicy, RetryRateLimitOptions};
use crate::backoff::BackoffSpec;
use crate::clock::Clock;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::window::SlidingWindowCounter;
use lru::LruCache;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Bound on cached derived plans for per-request overrides.
const PLAN_CACHE_CAPACITY: usize = 1000;

const DEFAULT_TIMEOUT_PER_ATTEMPT: Duration = Duration::from_millis(5000);

/// A parsed `Retry-After` header.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryAfter {
    /// The verbatim header value.
    pub raw: String,
    /// The delay the value resolves to; `None` for dates already in the
    /// past, whose value is ignored.
    pub delay: Option<Duration>,
}

impl RetryAfter {
    /// Parse delta-seconds or an RFC-1123 date relative to `now`.
    pub fn parse(raw: &str, now: std::time::SystemTime) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Ok(seconds) = trimmed.parse::<i64>() {
            let delay = u64::try_from(seconds).ok().map(Duration::from_secs);
            return Some(Self { raw: raw.to_string(), delay });
        }
        let date = httpdate::parse_http_date(trimmed).ok()?;
        let delay = date.duration_since(now).ok();
        Some(Self { raw: raw.to_string(), delay })
    }
}

/// What one attempt produced, as seen by the decision rules.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Response { status: u16, retry_after: Option<RetryAfter> },
    Failure(FailureKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The attempt exceeded its timeout.
    Timeout,
    /// The transport reports the request was never sent.
    Unprocessed,
    /// Any other exception.
    Other,
}

/// A fully resolved retry configuration.
#[derive(Debug, Clone)]
pub struct RetryPlan {
    pub max_attempts: u32,
    pub backoff: BackoffSpec,
    pub timeout_per_attempt: Duration,
    pub retry_policies: Vec<RetryPolicy>,
    pub http_status_options: Vec<super::options::HttpStatusOption>,
    pub retry_after_strategy: Option<RetryAfterStrategy>,
}

impl RetryPlan {
    fn engine_default() -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffSpec::default_exponential(),
            timeout_per_attempt: DEFAULT_TIMEOUT_PER_ATTEMPT,
            retry_policies: Vec::new(),
            http_status_options: Vec::new(),
            retry_after_strategy: None,
        }
    }

    /// Overlay `options` onto this plan, field by field.
    fn overlay(&self, options: &RetryOptions) -> Self {
        Self {
            max_attempts: options.max_attempts.unwrap_or(self.max_attempts),
            backoff: options.backoff.clone().unwrap_or_else(|| self.backoff.clone()),
            timeout_per_attempt: options.timeout_per_attempt.unwrap_or(self.timeout_per_attempt),
            retry_policies: if options.retry_policies.is_empty() {
                self.retry_policies.clone()
            } else {
                options.retry_policies.clone()
            },
            http_status_options: if options.http_status_options.is_empty() {
                self.http_status_options.clone()
            } else {
                options.http_status_options.clone()
            },
            retry_after_strategy: options.retry_after_strategy.or(self.retry_after_strategy),
        }
    }
}

/// Retry budget over the request and retry rates.
#[derive(Debug)]
pub struct RetryBudget {
    requests: SlidingWindowCounter,
    retries: SlidingWindowCounter,
    minimum_retry_count: i64,
    ratio: f64,
}

impl RetryBudget {
    pub fn new(options: &RetryRateLimitOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            requests: SlidingWindowCounter::with_clock(options.window, clock.clone()),
            retries: SlidingWindowCounter::with_clock(options.window, clock),
            minimum_retry_count: options.minimum_retry_count,
            ratio: options.retry_threshold_ratio,
        }
    }

    fn record_request(&self) {
        self.requests.count(1);
    }

    fn record_retry(&self) {
        self.retries.count(1);
    }

    /// Remaining budget:
    /// `max(requestRate · ratio, minimumRetryCount) − retryRate`.
    fn can_retry(&self) -> bool {
        if self.ratio < 0.0 {
            return true;
        }
        let allowance =
            (self.requests.get() as f64 * self.ratio).max(self.minimum_retry_count as f64);
        allowance - self.retries.get() as f64 > 0.0
    }
}

/// Context handed to each attempt closure.
#[derive(Debug, Clone, Copy)]
pub struct AttemptContext {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Timeout the dispatcher must enforce around this attempt.
    pub timeout: Duration,
}

/// The decision engine. One engine is shared by all dispatchers of a
/// client; the derived-plan cache is keyed by the override options.
pub struct RetryEngine {
    default_plan: Arc<RetryPlan>,
    budget: Option<RetryBudget>,
    cache: Mutex<LruCache<RetryOptions, Arc<RetryPlan>>>,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryEngine")
            .field("default_plan", &self.default_plan)
            .field("budget", &self.budget)
            .finish()
    }
}

impl RetryEngine {
    pub fn new(profile_defaults: Option<&RetryOptions>, budget: Option<RetryBudget>) -> Self {
        Self::with_sleeper(profile_defaults, budget, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(
        profile_defaults: Option<&RetryOptions>,
        budget: Option<RetryBudget>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let mut default_plan = RetryPlan::engine_default();
        if let Some(options) = profile_defaults {
            default_plan = default_plan.overlay(options);
        }
        Self {
            default_plan: Arc::new(default_plan),
            budget,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(PLAN_CACHE_CAPACITY).expect("non-zero cache capacity"),
            )),
            sleeper,
        }
    }

    /// Resolve the plan for a call, consulting the override cache.
    pub fn resolve_plan(&self, options: Option<&RetryOptions>) -> Arc<RetryPlan> {
        let options = match options {
            Some(options) if !options.is_empty() => options,
            _ => return Arc::clone(&self.default_plan),
        };
        let mut cache = self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(plan) = cache.get(options) {
            return Arc::clone(plan);
        }
        let plan = Arc::new(self.default_plan.overlay(options));
        cache.put(options.clone(), Arc::clone(&plan));
        plan
    }

    /// Run `op` under the resolved plan. The closure receives the
    /// attempt context and reports both its value and the outcome the
    /// decision rules consume; attempts are strictly sequential.
    pub async fn execute<T, F, Fut>(&self, plan: &RetryPlan, mut op: F) -> T
    where
        F: FnMut(AttemptContext) -> Fut,
        Fut: Future<Output = (T, AttemptOutcome)>,
    {
        if let Some(budget) = &self.budget {
            budget.record_request();
        }

        let mut attempt = 1u32;
        loop {
            let context = AttemptContext { attempt, timeout: plan.timeout_per_attempt };
            let (value, outcome) = op(context).await;

            if attempt >= plan.max_attempts {
                return value;
            }
            let Some(delay) = self.decide(plan, &outcome, attempt) else {
                return value;
            };
            debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying delivery attempt");
            if let Some(budget) = &self.budget {
                budget.record_retry();
            }
            self.sleeper.sleep(delay).await;
            attempt += 1;
        }
    }

    /// Combine the rules in priority order. `Some(delay)` mandates a
    /// retry after `delay`; `None` terminates the call.
    fn decide(&self, plan: &RetryPlan, outcome: &AttemptOutcome, attempt: u32) -> Option<Duration> {
        // 1. Rate-limit gate.
        if let Some(budget) = &self.budget {
            if !budget.can_retry() {
                debug!("retry budget exhausted, declining retry");
                return None;
            }
        }

        // 2. Retry-After strategy.
        if let AttemptOutcome::Response { retry_after: Some(retry_after), .. } = outcome {
            match plan.retry_after_strategy {
                Some(RetryAfterStrategy::NoRetry) => return None,
                Some(RetryAfterStrategy::Comply) => {
                    if let Some(delay) = retry_after.delay {
                        return Some(delay);
                    }
                    // Past dates carry no usable value; fall through.
                }
                Some(RetryAfterStrategy::Ignore) | None => {}
            }
        }

        // 3. First matching per-status option.
        if let AttemptOutcome::Response { status, .. } = outcome {
            if let Some(option) = plan.http_status_options.iter().find(|o| o.matches(*status)) {
                if option.no_retry {
                    return None;
                }
                let backoff = option.backoff.as_ref().unwrap_or(&plan.backoff);
                return Some(backoff.next_delay(attempt));
            }
        }

        // 4. Policy set.
        for policy in &plan.retry_policies {
            match policy_verdict(*policy, plan, outcome, attempt) {
                PolicyVerdict::Retry(delay) => return Some(delay),
                PolicyVerdict::NoRetry => return None,
                PolicyVerdict::NoOpinion => {}
            }
        }

        None
    }
}

enum PolicyVerdict {
    Retry(Duration),
    NoRetry,
    NoOpinion,
}

fn policy_verdict(
    policy: RetryPolicy,
    plan: &RetryPlan,
    outcome: &AttemptOutcome,
    attempt: u32,
) -> PolicyVerdict {
    let default_delay = || plan.backoff.next_delay(attempt);
    match (policy, outcome) {
        (RetryPolicy::ClientError, AttemptOutcome::Response { status: 400..=499, .. }) => {
            PolicyVerdict::Retry(default_delay())
        }
        (RetryPolicy::ServerError, AttemptOutcome::Response { status: 500..=599, .. }) => {
            PolicyVerdict::Retry(default_delay())
        }
        (RetryPolicy::Timeout, AttemptOutcome::Failure(FailureKind::Timeout)) => {
            PolicyVerdict::Retry(default_delay())
        }
        (RetryPolicy::OnException, AttemptOutcome::Failure(_)) => {
            PolicyVerdict::Retry(default_delay())
        }
        (RetryPolicy::OnUnprocessed, AttemptOutcome::Failure(FailureKind::Unprocessed)) => {
            PolicyVerdict::Retry(default_delay())
        }
        (RetryPolicy::FcmDefault, outcome) => fcm_default_verdict(outcome, attempt),
        _ => PolicyVerdict::NoOpinion,
    }
}

/// FCM's combined rule. Other-exception retries use the engine's
/// generic default backoff, independent of the attempt timeout.
fn fcm_default_verdict(outcome: &AttemptOutcome, attempt: u32) -> PolicyVerdict {
    const FCM_RETRY_AFTER_FALLBACK: Duration = Duration::from_secs(60);
    match outcome {
        AttemptOutcome::Response { status: 400 | 401 | 403 | 404, .. } => PolicyVerdict::NoRetry,
        AttemptOutcome::Response { status: 429, retry_after } => {
            let delay = retry_after
                .as_ref()
                .and_then(|retry_after| retry_after.delay)
                .unwrap_or(FCM_RETRY_AFTER_FALLBACK);
            PolicyVerdict::Retry(delay)
        }
        AttemptOutcome::Response { status: 500..=599, .. } => {
            let backoff = crate::backoff::Backoff::exponential(
                Duration::from_secs(10),
                Duration::from_secs(60),
                3.0,
            );
            PolicyVerdict::Retry(backoff.delay(attempt))
        }
        AttemptOutcome::Failure(_) => {
            PolicyVerdict::Retry(BackoffSpec::default_exponential().base_delay(attempt))
        }
        AttemptOutcome::Response { .. } => PolicyVerdict::NoOpinion,
    }
}
