//! Retry orchestration: options, the decision engine, and the relayed
//! header codec.

mod engine;
mod headers;
mod options;

pub use engine::{
    AttemptContext, AttemptOutcome, FailureKind, RetryAfter, RetryBudget, RetryEngine, RetryPlan,
};
pub use headers::{
    from_header_pairs, response_timeout_from_value, response_timeout_pair, to_header_pairs,
};
pub use options::{
    HttpStatusOption, PushOptions, RetryAfterStrategy, RetryOptions, RetryOptionsBuilder,
    RetryPolicy, RetryRateLimitOptions,
};

pub mod header_names {
    pub use super::headers::{
        BACKOFF, HTTP_STATUS_OPTIONS, MAX_ATTEMPTS, RESPONSE_TIMEOUT, RETRY_AFTER_STRATEGY,
        RETRY_POLICIES, TIMEOUT_PER_ATTEMPT,
    };
}
