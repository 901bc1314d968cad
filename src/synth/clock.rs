//! Simulation clock
//!
//! Ticks are whole seconds: each inter-arrival draw is rounded up, never
//! below one second, and capped by `max_interval_s` when configured.

use super::{Result, SynthError};
use crate::random::ValueSource;
use rand::Rng;

/// Simulated time in integer seconds, advanced by random inter-arrival deltas
#[derive(Debug, Clone)]
pub struct SimClock {
    start: i64,
    run_limit: i64,
    current: i64,
    max_interval: Option<i64>,
    inter_arrival: ValueSource,
}

impl SimClock {
    pub fn new(
        start: i64,
        run_limit: i64,
        inter_arrival: ValueSource,
        max_interval: Option<i64>,
    ) -> Self {
        Self {
            start,
            run_limit,
            current: start,
            max_interval,
            inter_arrival,
        }
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.start + self.run_limit
    }

    pub fn now(&self) -> i64 {
        self.current
    }

    pub fn elapsed(&self) -> i64 {
        self.current - self.start
    }

    pub fn is_done(&self) -> bool {
        self.current >= self.end()
    }

    /// Draw the next delta and move forward, returning the new time.
    ///
    /// Deltas are rounded up to whole seconds, at least one, so the clock
    /// always makes progress.
    pub fn advance<R: Rng>(&mut self, rng: &mut R) -> Result<i64> {
        let raw = self.inter_arrival.sample(rng);
        if !raw.is_finite() || raw < 0.0 {
            return Err(SynthError::InvalidInterArrival(raw));
        }
        let mut delta = (raw.ceil() as i64).max(1);
        if let Some(cap) = self.max_interval {
            delta = delta.min(cap);
        }
        self.current += delta;
        Ok(self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::DistributionSpec;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_constant_clock() {
        let source = DistributionSpec::Constant { value: 10.0 }.build().unwrap();
        let mut clock = SimClock::new(100, 25, source, None);
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(clock.advance(&mut rng).unwrap(), 110);
        assert_eq!(clock.advance(&mut rng).unwrap(), 120);
        assert!(!clock.is_done());
        assert_eq!(clock.advance(&mut rng).unwrap(), 130);
        assert!(clock.is_done());
        assert_eq!(clock.elapsed(), 30);
    }

    #[test]
    fn test_max_interval_caps_delta() {
        let source = DistributionSpec::Constant { value: 1000.0 }.build().unwrap();
        let mut clock = SimClock::new(0, 100, source, Some(7));
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(clock.advance(&mut rng).unwrap(), 7);
    }

    #[test]
    fn test_zero_delta_still_progresses() {
        let source = DistributionSpec::Constant { value: 0.0 }.build().unwrap();
        let mut clock = SimClock::new(0, 100, source, None);
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(clock.advance(&mut rng).unwrap(), 1);
    }

    #[test]
    fn test_negative_delta_rejected() {
        let source = DistributionSpec::Constant { value: -3.0 }.build().unwrap();
        let mut clock = SimClock::new(0, 100, source, None);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            clock.advance(&mut rng),
            Err(SynthError::InvalidInterArrival(v)) if v == -3.0
        ));
        assert_eq!(clock.now(), 0);
    }
}
