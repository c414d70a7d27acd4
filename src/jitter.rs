//! Jitter applied to backoff delays to avoid coordinated retries.

use rand::Rng;
use std::time::Duration;

/// Jitter strategy for randomizing retry delays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    /// No jitter, use the exact backoff delay.
    None,
    /// Randomize within `delay * (1 ± ratio)`.
    Ratio(f64),
    /// Random between 0 and the delay.
    Full,
}

impl Jitter {
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rand::rng())
    }

    /// Apply jitter with a caller-supplied RNG (for deterministic tests).
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        let millis = delay.as_millis() as u64;
        if millis == 0 {
            return Duration::ZERO;
        }
        match self {
            Jitter::None => delay,
            Jitter::Ratio(ratio) => {
                let span = (millis as f64 * ratio).round() as u64;
                if span == 0 {
                    return delay;
                }
                let low = millis.saturating_sub(span);
                let high = millis.saturating_add(span);
                Duration::from_millis(rng.random_range(low..=high))
            }
            Jitter::Full => Duration::from_millis(rng.random_range(0..=millis)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn none_returns_exact_delay() {
        assert_eq!(Jitter::None.apply(Duration::from_secs(1)), Duration::from_secs(1));
    }

    #[test]
    fn ratio_stays_within_band() {
        let jitter = Jitter::Ratio(0.25);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let jittered = jitter.apply_with_rng(Duration::from_millis(1000), &mut rng);
            assert!(jittered >= Duration::from_millis(750));
            assert!(jittered <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn full_stays_below_delay() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let jittered = Jitter::Full.apply_with_rng(Duration::from_millis(1000), &mut rng);
            assert!(jittered <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn zero_delay_is_left_alone() {
        assert_eq!(Jitter::Ratio(0.5).apply(Duration::ZERO), Duration::ZERO);
        assert_eq!(Jitter::Full.apply(Duration::ZERO), Duration::ZERO);
    }
}
