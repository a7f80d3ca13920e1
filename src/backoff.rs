use std::time::Duration;

/// Delay schedule applied between retries of a rate-limited request.
///
/// The delay before retry `n` (counting from zero) is
/// `min(base * ceiling, round(base * factor^n))`, computed in whole
/// milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub factor: f64,

    /// The delay never exceeds `base * ceiling`.
    pub ceiling: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(2000),
            factor: 1.5,
            ceiling: 10,
        }
    }
}

impl Backoff {
    pub fn with_base(base: Duration) -> Self {
        Self {
            base,
            ..Self::default()
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as f64;
        let cap_ms = base_ms * f64::from(self.ceiling);
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let grown_ms = (base_ms * self.factor.powi(exponent)).round();

        // powi overflows to infinity long before the exponent saturates; min
        // takes care of it.
        Duration::from_millis(grown_ms.min(cap_ms) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule() {
        let backoff = Backoff::default();
        let delays: Vec<u128> = (0..8).map(|n| backoff.delay(n).as_millis()).collect();

        assert_eq!(
            delays,
            [2000, 3000, 4500, 6750, 10125, 15188, 20000, 20000]
        );
    }

    #[test]
    fn capped_for_huge_attempts() {
        let backoff = Backoff::with_base(Duration::from_millis(100));

        assert_eq!(backoff.delay(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn zero_base_never_waits() {
        let backoff = Backoff::with_base(Duration::ZERO);

        assert_eq!(backoff.delay(0), Duration::ZERO);
        assert_eq!(backoff.delay(40), Duration::ZERO);
    }
}
