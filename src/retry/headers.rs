//! The reserved header set used to relay retry options through another
//! gateway instance.
//!
//! Serialization is total; deserialization is lenient: invalid
//! individual fields are silently dropped, and a header set containing
//! no valid field deserializes to no override at all.

use super::options::{HttpStatusOption, RetryAfterStrategy, RetryOptions, RetryPolicy};
use crate::backoff::BackoffSpec;
use std::time::Duration;

pub const MAX_ATTEMPTS: &str = "retry-options-max-attempts";
pub const BACKOFF: &str = "retry-options-backoff";
pub const TIMEOUT_PER_ATTEMPT: &str = "retry-options-timeout-per-attempt";
pub const RETRY_POLICIES: &str = "retry-options-retry-policies";
pub const HTTP_STATUS_OPTIONS: &str = "retry-options-http-status-options";
pub const RETRY_AFTER_STRATEGY: &str = "retry-options-retry-after-strategy";
pub const RESPONSE_TIMEOUT: &str = "response-timeout";

/// Serialize retry options into `(name, value)` pairs. The
/// http-status-options header repeats, one value per option.
pub fn to_header_pairs(options: &RetryOptions) -> Vec<(&'static str, String)> {
    let mut pairs = Vec::new();
    if let Some(max_attempts) = options.max_attempts {
        pairs.push((MAX_ATTEMPTS, max_attempts.to_string()));
    }
    if let Some(backoff) = &options.backoff {
        pairs.push((BACKOFF, backoff.as_str().to_string()));
    }
    if let Some(timeout) = options.timeout_per_attempt {
        pairs.push((TIMEOUT_PER_ATTEMPT, timeout.as_millis().to_string()));
    }
    if !options.retry_policies.is_empty() {
        let names: Vec<&str> = options.retry_policies.iter().map(RetryPolicy::as_str).collect();
        pairs.push((RETRY_POLICIES, names.join(",")));
    }
    for option in &options.http_status_options {
        pairs.push((HTTP_STATUS_OPTIONS, status_option_to_value(option)));
    }
    if let Some(strategy) = options.retry_after_strategy {
        pairs.push((RETRY_AFTER_STRATEGY, strategy.as_str().to_string()));
    }
    pairs
}

/// Serialize a response timeout for the relay hop.
pub fn response_timeout_pair(timeout: Duration) -> (&'static str, String) {
    (RESPONSE_TIMEOUT, timeout.as_millis().to_string())
}

/// Deserialize retry options from `(name, value)` pairs. Returns `None`
/// when no field survives validation.
pub fn from_header_pairs<'a, I>(pairs: I) -> Option<RetryOptions>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut options = RetryOptions::default();
    for (name, value) in pairs {
        let value = value.trim();
        match name.to_ascii_lowercase().as_str() {
            MAX_ATTEMPTS => {
                // The relayed form only makes sense for actual retries.
                if let Ok(max_attempts @ 2..) = value.parse::<u32>() {
                    options.max_attempts = Some(max_attempts);
                }
            }
            BACKOFF => {
                if let Ok(backoff) = value.parse::<BackoffSpec>() {
                    options.backoff = Some(backoff);
                }
            }
            TIMEOUT_PER_ATTEMPT => {
                if let Ok(millis) = value.parse::<u64>() {
                    options.timeout_per_attempt = Some(Duration::from_millis(millis));
                }
            }
            RETRY_POLICIES => {
                let policies: Vec<RetryPolicy> =
                    value.split(',').filter_map(|name| name.parse().ok()).collect();
                if !policies.is_empty() {
                    options.retry_policies = policies;
                }
            }
            HTTP_STATUS_OPTIONS => {
                if let Some(option) = status_option_from_value(value) {
                    options.http_status_options.push(option);
                }
            }
            RETRY_AFTER_STRATEGY => {
                if let Ok(strategy) = value.parse::<RetryAfterStrategy>() {
                    options.retry_after_strategy = Some(strategy);
                }
            }
            _ => {}
        }
    }
    if options.is_empty() {
        None
    } else {
        Some(options)
    }
}

/// Parse a relayed `response-timeout` value.
pub fn response_timeout_from_value(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_millis)
}

fn status_option_to_value(option: &HttpStatusOption) -> String {
    let statuses: Vec<String> = option.statuses.iter().map(u16::to_string).collect();
    let mut value = format!("statuses={}", statuses.join(","));
    if let Some(backoff) = &option.backoff {
        value.push_str("&backoff=");
        value.push_str(backoff.as_str());
    }
    value.push_str("&noRetry=");
    value.push_str(if option.no_retry { "true" } else { "false" });
    value
}

/// Fields may appear in any order; unknown fields and whitespace are
/// tolerated. An option without statuses is invalid.
fn status_option_from_value(value: &str) -> Option<HttpStatusOption> {
    let mut statuses: Vec<u16> = Vec::new();
    let mut backoff = None;
    let mut no_retry = false;
    for field in value.split('&') {
        let (name, field_value) = field.split_once('=')?;
        match name.trim() {
            "statuses" => {
                for status in field_value.split(',') {
                    statuses.push(status.trim().parse().ok()?);
                }
            }
            "backoff" => {
                let field_value = field_value.trim();
                if !field_value.is_empty() {
                    backoff = Some(field_value.parse::<BackoffSpec>().ok()?);
                }
            }
            "noRetry" => {
                no_retry = match field_value.trim() {
                    "true" => true,
                    "false" => false,
                    _ => return None,
                };
            }
            _ => {}
        }
    }
    if statuses.is_empty() {
        return None;
    }
    Some(HttpStatusOption { statuses, backoff, no_retry })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_options() -> RetryOptions {
        RetryOptions::builder()
            .max_attempts(2)
            .backoff("fixed=200".parse().unwrap())
            .timeout_per_attempt(Duration::from_millis(1000))
            .retry_policy(RetryPolicy::Timeout)
            .retry_policy(RetryPolicy::ClientError)
            .http_status_option(
                HttpStatusOption::new(vec![400, 401, 403, 404])
                    .with_backoff("200;10000,jitter=0.2".parse().unwrap()),
            )
            .http_status_option(HttpStatusOption::new(vec![429]).no_retry())
            .retry_after_strategy(RetryAfterStrategy::Comply)
            .build()
            .unwrap()
    }

    #[test]
    fn options_round_trip_through_headers() {
        let options = sample_options();
        let pairs = to_header_pairs(&options);
        let borrowed: Vec<(&str, &str)> =
            pairs.iter().map(|(name, value)| (*name, value.as_str())).collect();
        assert_eq!(from_header_pairs(borrowed), Some(options));
    }

    #[test]
    fn status_option_fields_are_order_independent() {
        let value = " noRetry=false & backoff=fixed=100 & statuses= 500 , 503 ";
        let option = status_option_from_value(value).unwrap();
        assert_eq!(option.statuses, vec![500, 503]);
        assert_eq!(option.backoff.unwrap().as_str(), "fixed=100");
        assert!(!option.no_retry);
    }

    #[test]
    fn invalid_fields_are_dropped_silently() {
        let pairs = vec![
            (MAX_ATTEMPTS, "1"),           // below the relayed minimum
            (BACKOFF, "linear=100"),       // unknown spec
            (TIMEOUT_PER_ATTEMPT, "250"),  // valid
            (RETRY_POLICIES, "NOT_A_POLICY"),
            (HTTP_STATUS_OPTIONS, "backoff=fixed=1&noRetry=true"), // no statuses
            (RETRY_AFTER_STRATEGY, "MAYBE"),
        ];
        let options = from_header_pairs(pairs).unwrap();
        assert_eq!(options.timeout_per_attempt, Some(Duration::from_millis(250)));
        assert_eq!(options.max_attempts, None);
        assert!(options.backoff.is_none());
        assert!(options.retry_policies.is_empty());
        assert!(options.http_status_options.is_empty());
        assert!(options.retry_after_strategy.is_none());
    }

    #[test]
    fn all_invalid_fields_mean_no_override() {
        let pairs = vec![(MAX_ATTEMPTS, "x"), (RETRY_AFTER_STRATEGY, "MAYBE")];
        assert_eq!(from_header_pairs(pairs), None);
    }

    #[test]
    fn response_timeout_round_trips() {
        let (name, value) = response_timeout_pair(Duration::from_millis(1500));
        assert_eq!(name, RESPONSE_TIMEOUT);
        assert_eq!(response_timeout_from_value(&value), Some(Duration::from_millis(1500)));
        assert_eq!(response_timeout_from_value("soon"), None);
    }
}
