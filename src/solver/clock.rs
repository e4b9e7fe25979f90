//! Simulated time

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{BenthosError, BenthosResult};

/// Clock of a model in seconds of simulated time
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelClock {
    seconds: f64,
}

impl ModelClock {
    /// Clock at zero
    pub fn new() -> Self {
        Self { seconds: 0.0 }
    }

    /// Clock at `seconds`
    pub fn at(seconds: f64) -> BenthosResult<Self> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(BenthosError::numerical(format!("invalid clock time {}", seconds)));
        }
        Ok(Self { seconds })
    }

    /// Current time in seconds
    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    /// Current time in hours
    pub fn hours(&self) -> f64 {
        self.seconds / 3600.0
    }

    /// Advance by `dt` seconds
    pub fn increment_time(&mut self, dt: f64) -> BenthosResult<()> {
        if !(dt > 0.0) || !dt.is_finite() {
            return Err(BenthosError::numerical(format!(
                "clock increment must be positive, got {}",
                dt
            )));
        }
        self.seconds += dt;
        Ok(())
    }

    /// Jump to `seconds`
    pub fn set_time(&mut self, seconds: f64) -> BenthosResult<()> {
        *self = Self::at(seconds)?;
        Ok(())
    }
}

impl PartialEq<f64> for ModelClock {
    fn eq(&self, other: &f64) -> bool {
        self.seconds == *other
    }
}

impl PartialOrd for ModelClock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.seconds.partial_cmp(&other.seconds)
    }
}

impl PartialOrd<f64> for ModelClock {
    fn partial_cmp(&self, other: &f64) -> Option<Ordering> {
        self.seconds.partial_cmp(other)
    }
}

impl fmt::Display for ModelClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4} h", self.hours())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_increment_and_compare() {
        let mut clock = ModelClock::new();
        clock.increment_time(1800.0).unwrap();
        clock.increment_time(1800.0).unwrap();
        assert_relative_eq!(clock.hours(), 1.0);
        assert!(clock > ModelClock::new());
        assert!(clock >= 3600.0);
        assert!(clock == 3600.0);
        assert_eq!(clock.to_string(), "1.0000 h");
    }

    #[test]
    fn test_non_positive_increment_fails() {
        let mut clock = ModelClock::new();
        assert!(clock.increment_time(0.0).is_err());
        assert!(clock.increment_time(-1.0).is_err());
        assert!(clock.increment_time(f64::NAN).is_err());
        assert_eq!(clock.seconds(), 0.0);
    }
}
