//! Backoff strategies and the backoff spec string language.
//!
//! A backoff spec is a small string recipe carried in configuration and
//! relayed gateway headers:
//!
//! - `fixed=<ms>` — the same delay before every retry.
//! - `exponential=<init>:<max>:<factor>` — growing delay, capped at
//!   `<max>`; the factor may be omitted and defaults to 2.0.
//! - `<init>;<max>` — compressed exponential form used by relayed
//!   header sets, default factor 2.0.
//!
//! Any form accepts a `,jitter=<ratio>` suffix. The raw string is kept
//! verbatim so serializing a parsed spec reproduces the input exactly.

use crate::error::Error;
use crate::jitter::Jitter;
use std::str::FromStr;
use std::time::Duration;

/// Delay sequence generator for retries.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Fixed delay between retries.
    Fixed { delay: Duration },
    /// Exponentially increasing delay with a cap.
    Exponential { initial: Duration, max: Duration, factor: f64 },
}

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Backoff::Fixed { delay }
    }

    pub fn exponential(initial: Duration, max: Duration, factor: f64) -> Self {
        Backoff::Exponential { initial, max, factor }
    }

    /// Delay before the retry following `attempt` (1-indexed: attempt 1
    /// yields the initial delay).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed { delay } => *delay,
            Backoff::Exponential { initial, max, factor } => {
                let exponent = attempt.saturating_sub(1).min(63);
                let millis = initial.as_millis() as f64 * factor.powi(exponent as i32);
                let capped = millis.min(max.as_millis() as f64);
                Duration::from_millis(capped as u64)
            }
        }
    }
}

/// Default engine backoff used when options leave the spec empty.
pub const DEFAULT_BACKOFF_SPEC: &str = "exponential=200:10000:2.0";

/// A parsed backoff spec together with its source string.
#[derive(Debug, Clone)]
pub struct BackoffSpec {
    raw: String,
    backoff: Backoff,
    jitter: Jitter,
}

impl BackoffSpec {
    /// The spec every other default falls back to.
    pub fn default_exponential() -> Self {
        DEFAULT_BACKOFF_SPEC.parse().unwrap_or_else(|_| Self::from_fixed(Duration::from_secs(1)))
    }

    /// A spec equivalent to `fixed=<ms>`, e.g. for `Retry-After` compliance.
    pub fn from_fixed(delay: Duration) -> Self {
        Self {
            raw: format!("fixed={}", delay.as_millis()),
            backoff: Backoff::fixed(delay),
            jitter: Jitter::None,
        }
    }

    /// The verbatim source string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Jittered delay before the retry following `attempt` (1-indexed).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.jitter.apply(self.backoff.delay(attempt))
    }

    /// Un-jittered delay, for deterministic assertions.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }
}

impl PartialEq for BackoffSpec {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for BackoffSpec {}

impl std::hash::Hash for BackoffSpec {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl std::fmt::Display for BackoffSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for BackoffSpec {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Error> {
        let spec = raw.trim();
        if spec.is_empty() {
            return Err(invalid(raw, "empty spec"));
        }

        let (body, jitter) = match spec.split_once(",jitter=") {
            Some((body, ratio)) => {
                let ratio: f64 =
                    ratio.trim().parse().map_err(|_| invalid(raw, "jitter ratio is not a number"))?;
                if !(0.0..=1.0).contains(&ratio) {
                    return Err(invalid(raw, "jitter ratio must be within [0.0, 1.0]"));
                }
                (body.trim(), Jitter::Ratio(ratio))
            }
            None => (spec, Jitter::None),
        };

        let backoff = if let Some(millis) = body.strip_prefix("fixed=") {
            Backoff::fixed(parse_millis(raw, millis)?)
        } else if let Some(rest) = body.strip_prefix("exponential=") {
            let mut parts = rest.split(':');
            let initial = parse_millis(raw, parts.next().unwrap_or_default())?;
            let max = parse_millis(raw, parts.next().ok_or_else(|| invalid(raw, "missing max"))?)?;
            let factor = match parts.next() {
                Some(factor) => factor
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|f| *f >= 1.0)
                    .ok_or_else(|| invalid(raw, "factor must be a number >= 1.0"))?,
                None => 2.0,
            };
            if parts.next().is_some() {
                return Err(invalid(raw, "too many exponential components"));
            }
            if max < initial {
                return Err(invalid(raw, "max must be >= initial"));
            }
            Backoff::exponential(initial, max, factor)
        } else if let Some((initial, max)) = body.split_once(';') {
            let initial = parse_millis(raw, initial)?;
            let max = parse_millis(raw, max)?;
            if max < initial {
                return Err(invalid(raw, "max must be >= initial"));
            }
            Backoff::exponential(initial, max, 2.0)
        } else {
            return Err(invalid(raw, "unrecognized spec"));
        };

        Ok(Self { raw: raw.to_string(), backoff, jitter })
    }
}

fn parse_millis(raw: &str, value: &str) -> Result<Duration, Error> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| invalid(raw, "delay is not a non-negative integer"))
}

fn invalid(spec: &str, reason: &str) -> Error {
    Error::InvalidBackoffSpec { spec: spec.to_string(), reason: reason.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_spec_returns_same_delay() {
        let spec: BackoffSpec = "fixed=500".parse().unwrap();
        assert_eq!(spec.base_delay(1), Duration::from_millis(500));
        assert_eq!(spec.base_delay(7), Duration::from_millis(500));
        assert_eq!(spec.as_str(), "fixed=500");
    }

    #[test]
    fn exponential_spec_grows_and_caps() {
        let spec: BackoffSpec = "exponential=100:1000:2.0".parse().unwrap();
        assert_eq!(spec.base_delay(1), Duration::from_millis(100));
        assert_eq!(spec.base_delay(2), Duration::from_millis(200));
        assert_eq!(spec.base_delay(3), Duration::from_millis(400));
        assert_eq!(spec.base_delay(5), Duration::from_millis(1000));
        assert_eq!(spec.base_delay(20), Duration::from_millis(1000));
    }

    #[test]
    fn exponential_factor_defaults_to_two() {
        let spec: BackoffSpec = "exponential=100:10000".parse().unwrap();
        assert_eq!(spec.base_delay(2), Duration::from_millis(200));
    }

    #[test]
    fn compressed_exponential_form_parses() {
        let spec: BackoffSpec = "200;10000,jitter=0.2".parse().unwrap();
        assert_eq!(spec.base_delay(1), Duration::from_millis(200));
        assert_eq!(spec.base_delay(2), Duration::from_millis(400));
        // The raw form round-trips byte-exact.
        assert_eq!(spec.as_str(), "200;10000,jitter=0.2");
    }

    #[test]
    fn jittered_delay_stays_within_ratio() {
        let spec: BackoffSpec = "fixed=1000,jitter=0.2".parse().unwrap();
        for _ in 0..100 {
            let delay = spec.next_delay(1);
            assert!(delay >= Duration::from_millis(800));
            assert!(delay <= Duration::from_millis(1200));
        }
    }

    #[test]
    fn malformed_specs_are_rejected() {
        for spec in [
            "",
            "fixed=",
            "fixed=abc",
            "exponential=100",
            "exponential=1000:100",
            "exponential=100:1000:0.5",
            "exponential=100:1000:2.0:9",
            "linear=100",
            "fixed=100,jitter=1.5",
        ] {
            assert!(spec.parse::<BackoffSpec>().is_err(), "accepted {spec:?}");
        }
    }

    #[test]
    fn fcm_default_shape() {
        let spec: BackoffSpec = "exponential=10000:60000:3.0".parse().unwrap();
        assert_eq!(spec.base_delay(1), Duration::from_millis(10000));
        assert_eq!(spec.base_delay(2), Duration::from_millis(30000));
        assert_eq!(spec.base_delay(3), Duration::from_millis(60000));
    }
}
