//! Retry configuration: policy names, per-status options, rate-limit
//! options, and the per-request override bundle.
//!
//! `RetryOptions` is a partial override: unset fields fall back
//! per-field from the per-request override to the profile default to
//! the engine default.

use crate::backoff::BackoffSpec;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Named retry policies composable into a policy set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryPolicy {
    /// Retry any 4xx response.
    ClientError,
    /// Retry any 5xx response.
    ServerError,
    /// Retry when the attempt timed out.
    Timeout,
    /// Retry on any exception.
    OnException,
    /// Retry when the transport reports the request was never sent.
    OnUnprocessed,
    /// FCM's documented combined rule: no retry on 400/401/403/404,
    /// `Retry-After` (default 60 s) on 429, a 10 s→60 s factor-3.0
    /// exponential on 5xx, default backoff on other exceptions.
    FcmDefault,
}

impl RetryPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryPolicy::ClientError => "CLIENT_ERROR",
            RetryPolicy::ServerError => "SERVER_ERROR",
            RetryPolicy::Timeout => "TIMEOUT",
            RetryPolicy::OnException => "ON_EXCEPTION",
            RetryPolicy::OnUnprocessed => "ON_UNPROCESSED",
            RetryPolicy::FcmDefault => "FCM_DEFAULT",
        }
    }
}

impl FromStr for RetryPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.trim() {
            "CLIENT_ERROR" => Ok(RetryPolicy::ClientError),
            "SERVER_ERROR" => Ok(RetryPolicy::ServerError),
            "TIMEOUT" => Ok(RetryPolicy::Timeout),
            "ON_EXCEPTION" => Ok(RetryPolicy::OnException),
            "ON_UNPROCESSED" => Ok(RetryPolicy::OnUnprocessed),
            "FCM_DEFAULT" => Ok(RetryPolicy::FcmDefault),
            other => Err(Error::InvalidRetryOptions(format!("unknown retry policy {other:?}"))),
        }
    }
}

/// What to do with a `Retry-After` response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryAfterStrategy {
    /// Terminate the call when the server asks to back off.
    NoRetry,
    /// Fall through to the remaining rules.
    Ignore,
    /// Retry after exactly the advertised delay.
    Comply,
}

impl RetryAfterStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryAfterStrategy::NoRetry => "NO_RETRY",
            RetryAfterStrategy::Ignore => "IGNORE",
            RetryAfterStrategy::Comply => "COMPLY",
        }
    }
}

impl FromStr for RetryAfterStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.trim() {
            "NO_RETRY" => Ok(RetryAfterStrategy::NoRetry),
            "IGNORE" => Ok(RetryAfterStrategy::Ignore),
            "COMPLY" => Ok(RetryAfterStrategy::Comply),
            other => {
                Err(Error::InvalidRetryOptions(format!("unknown retry-after strategy {other:?}")))
            }
        }
    }
}

/// Retry behavior for a set of HTTP statuses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HttpStatusOption {
    pub statuses: Vec<u16>,
    /// Backoff overriding the default for these statuses; `None` uses
    /// the resolved default backoff.
    pub backoff: Option<BackoffSpec>,
    pub no_retry: bool,
}

impl HttpStatusOption {
    pub fn new(statuses: Vec<u16>) -> Self {
        Self { statuses, backoff: None, no_retry: false }
    }

    pub fn with_backoff(mut self, backoff: BackoffSpec) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn no_retry(mut self) -> Self {
        self.no_retry = true;
        self
    }

    pub fn matches(&self, status: u16) -> bool {
        self.statuses.contains(&status)
    }
}

/// Partial retry configuration. Unset fields inherit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RetryOptions {
    pub max_attempts: Option<u32>,
    pub backoff: Option<BackoffSpec>,
    pub timeout_per_attempt: Option<Duration>,
    pub retry_policies: Vec<RetryPolicy>,
    pub http_status_options: Vec<HttpStatusOption>,
    pub retry_after_strategy: Option<RetryAfterStrategy>,
}

impl RetryOptions {
    pub fn builder() -> RetryOptionsBuilder {
        RetryOptionsBuilder::default()
    }

    /// True when nothing is set, i.e. the options impose no override.
    pub fn is_empty(&self) -> bool {
        *self == RetryOptions::default()
    }
}

#[derive(Debug, Default)]
pub struct RetryOptionsBuilder {
    options: RetryOptions,
}

impl RetryOptionsBuilder {
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.options.max_attempts = Some(attempts);
        self
    }

    pub fn backoff(mut self, backoff: BackoffSpec) -> Self {
        self.options.backoff = Some(backoff);
        self
    }

    pub fn timeout_per_attempt(mut self, timeout: Duration) -> Self {
        self.options.timeout_per_attempt = Some(timeout);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.options.retry_policies.push(policy);
        self
    }

    pub fn http_status_option(mut self, option: HttpStatusOption) -> Self {
        self.options.http_status_options.push(option);
        self
    }

    pub fn retry_after_strategy(mut self, strategy: RetryAfterStrategy) -> Self {
        self.options.retry_after_strategy = Some(strategy);
        self
    }

    pub fn build(self) -> Result<RetryOptions, Error> {
        if let Some(0) = self.options.max_attempts {
            return Err(Error::InvalidRetryOptions("maxAttempts must be >= 1".to_string()));
        }
        Ok(self.options)
    }
}

/// Retry-rate limiting over the sliding-window counters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryRateLimitOptions {
    /// Window both counters smooth over.
    pub window: Duration,
    /// Floor for the budget; negative values remove the floor.
    pub minimum_retry_count: i64,
    /// Allowed retries per observed request; negative disables the gate.
    pub retry_threshold_ratio: f64,
}

impl Default for RetryRateLimitOptions {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(10),
            minimum_retry_count: 10,
            retry_threshold_ratio: 0.1,
        }
    }
}

impl RetryRateLimitOptions {
    pub fn disabled() -> Self {
        Self { retry_threshold_ratio: -1.0, ..Self::default() }
    }

    pub fn is_enabled(&self) -> bool {
        self.retry_threshold_ratio >= 0.0
    }
}

/// Per-call options attached to a request.
///
/// The `local_*` fields govern this gateway's own delivery; the
/// `remote_*` fields are serialized into the reserved header set when
/// relaying through another gateway instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushOptions {
    pub local_retry_options: Option<RetryOptions>,
    pub local_total_timeout: Option<Duration>,
    pub remote_retry_options: Option<RetryOptions>,
    pub remote_total_timeout: Option<Duration>,
}

impl PushOptions {
    pub fn local_retry(options: RetryOptions) -> Self {
        Self { local_retry_options: Some(options), ..Self::default() }
    }
}
