//! Exponentially weighted moving average of round-trip samples.
//!
//! The estimator keeps a smoothed average and a smoothed mean deviation and
//! recommends `average + window * deviation` as a timeout. Each update moves
//! the average first and then measures the deviation against the new
//! average.

use cabin_core::{HarnessError, Result};
use serde::{Deserialize, Serialize};

/// Smoothing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EwmaConfig {
    /// Weight of a new sample in the average
    pub alpha: f64,
    /// Weight of a new sample's distance in the deviation
    pub beta: f64,
    /// Deviations added to the average to form a timeout
    pub window: f64,
}

impl Default for EwmaConfig {
    fn default() -> Self {
        Self {
            alpha: 0.125,
            beta: 0.25,
            window: 4.0,
        }
    }
}

impl EwmaConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_beta(mut self, beta: f64) -> Self {
        self.beta = beta;
        self
    }

    pub fn with_window(mut self, window: f64) -> Self {
        self.window = window;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_weight("alpha", self.alpha)?;
        validate_weight("beta", self.beta)?;
        validate_window(self.window)
    }
}

fn validate_weight(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(HarnessError::config(format!(
            "{} must lie in (0, 1], got {}",
            name, value
        )))
    }
}

fn validate_window(window: f64) -> Result<()> {
    if window.is_finite() && window >= 0.0 {
        Ok(())
    } else {
        Err(HarnessError::config(format!(
            "timeout window must be finite and non-negative, got {}",
            window
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EwmaState {
    pub average: f64,
    pub deviation: f64,
}

impl EwmaState {
    pub fn timeout(&self, window: f64) -> f64 {
        self.average + window * self.deviation
    }
}

/// Running EWMA estimator.
///
/// # Examples
///
/// ```rust
/// use cabin_rtt::EwmaEstimator;
///
/// let mut estimator = EwmaEstimator::default();
/// estimator.update(100.0).unwrap();
/// assert_eq!(estimator.average(), Some(100.0));
/// assert_eq!(estimator.deviation(), Some(0.0));
/// ```
#[derive(Debug, Clone, Default)]
pub struct EwmaEstimator {
    config: EwmaConfig,
    state: Option<EwmaState>,
    samples: usize,
}

impl EwmaEstimator {
    pub fn new(config: EwmaConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: None,
            samples: 0,
        })
    }

    /// Resumes from a known state, as if it had been seeded already.
    pub fn with_state(config: EwmaConfig, state: EwmaState) -> Result<Self> {
        config.validate()?;
        validate_sample(state.average)?;
        validate_sample(state.deviation)?;
        Ok(Self {
            config,
            state: Some(state),
            samples: 1,
        })
    }

    pub fn config(&self) -> &EwmaConfig {
        &self.config
    }

    /// Folds one sample in and returns the new state.
    pub fn update(&mut self, sample: f64) -> Result<EwmaState> {
        validate_sample(sample)?;

        let next = match self.state {
            None => EwmaState {
                average: sample,
                deviation: 0.0,
            },
            Some(state) => {
                let average = (1.0 - self.config.alpha) * state.average + self.config.alpha * sample;
                let deviation = (1.0 - self.config.beta) * state.deviation
                    + self.config.beta * (sample - average).abs();
                EwmaState { average, deviation }
            }
        };

        self.state = Some(next);
        self.samples += 1;
        Ok(next)
    }

    pub fn state(&self) -> Option<EwmaState> {
        self.state
    }

    pub fn average(&self) -> Option<f64> {
        self.state.map(|state| state.average)
    }

    pub fn deviation(&self) -> Option<f64> {
        self.state.map(|state| state.deviation)
    }

    /// Number of samples folded in since creation.
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Recommended timeout with the configured window, once seeded.
    pub fn timeout(&self) -> Option<f64> {
        self.timeout_with_window(self.config.window)
    }

    pub fn timeout_with_window(&self, window: f64) -> Option<f64> {
        self.state.map(|state| state.timeout(window))
    }
}

fn validate_sample(sample: f64) -> Result<()> {
    if !sample.is_finite() {
        return Err(HarnessError::InvalidSample {
            value: sample,
            reason: "not a finite number".to_string(),
        });
    }
    if sample < 0.0 {
        return Err(HarnessError::InvalidSample {
            value: sample,
            reason: "negative round-trip time".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn test_first_sample_seeds_state() {
        let mut estimator = EwmaEstimator::default();
        assert!(estimator.timeout().is_none());

        let state = estimator.update(42.5).unwrap();
        assert_eq!(state.average, 42.5);
        assert_eq!(state.deviation, 0.0);
        assert_eq!(estimator.timeout(), Some(42.5));
        assert_eq!(estimator.samples(), 1);
    }

    #[test]
    fn test_deviation_uses_updated_average() {
        let mut estimator = EwmaEstimator::with_state(
            EwmaConfig::default(),
            EwmaState {
                average: 100.0,
                deviation: 10.0,
            },
        )
        .unwrap();

        let state = estimator.update(150.0).unwrap();
        assert_close(state.average, 106.25);
        // 0.75 * 10 + 0.25 * |150 - 106.25|
        assert_close(state.deviation, 18.4375);
        assert_close(estimator.timeout_with_window(4.0).unwrap(), 180.0);
    }

    #[test]
    fn test_sequence() {
        let mut estimator = EwmaEstimator::default();
        for sample in [10.0, 20.0, 20.0] {
            estimator.update(sample).unwrap();
        }
        // 10 -> 11.25 (dev 2.1875) -> 12.34375 (dev 3.5546875)
        assert_close(estimator.average().unwrap(), 12.34375);
        assert_close(estimator.deviation().unwrap(), 3.5546875);
    }

    #[test]
    fn test_rejects_bad_samples() {
        let mut estimator = EwmaEstimator::default();
        assert!(matches!(
            estimator.update(-1.0),
            Err(HarnessError::InvalidSample { .. })
        ));
        assert!(estimator.update(f64::NAN).is_err());
        assert!(estimator.update(f64::INFINITY).is_err());
        assert!(estimator.state().is_none());
    }

    #[test]
    fn test_config_validation() {
        assert!(EwmaConfig::default().validate().is_ok());
        assert!(EwmaConfig::new().with_alpha(1.0).validate().is_ok());
        assert!(EwmaConfig::new().with_alpha(0.0).validate().is_err());
        assert!(EwmaConfig::new().with_beta(1.5).validate().is_err());
        assert!(EwmaConfig::new().with_window(-2.0).validate().is_err());
        assert!(EwmaEstimator::new(EwmaConfig::new().with_beta(f64::NAN)).is_err());
    }

    proptest! {
        #[test]
        fn average_stays_within_sample_range(
            samples in prop::collection::vec(0.0f64..10_000.0, 1..64)
        ) {
            let mut estimator = EwmaEstimator::default();
            for sample in &samples {
                estimator.update(*sample).unwrap();
            }
            let min = samples.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let average = estimator.average().unwrap();
            prop_assert!(average >= min - 1e-6 && average <= max + 1e-6);
        }

        #[test]
        fn timeout_never_below_average(
            samples in prop::collection::vec(0.0f64..10_000.0, 1..64),
            window in 0.0f64..16.0
        ) {
            let mut estimator = EwmaEstimator::default();
            for sample in &samples {
                let state = estimator.update(*sample).unwrap();
                prop_assert!(state.deviation >= 0.0);
            }
            let average = estimator.average().unwrap();
            prop_assert!(estimator.timeout_with_window(window).unwrap() >= average);
        }

        #[test]
        fn constant_samples_have_no_deviation(sample in 0.0f64..10_000.0, count in 1usize..32) {
            let mut estimator = EwmaEstimator::default();
            for _ in 0..count {
                estimator.update(sample).unwrap();
            }
            prop_assert!((estimator.average().unwrap() - sample).abs() < 1e-6);
            prop_assert!(estimator.deviation().unwrap() < 1e-6);
        }
    }
}
