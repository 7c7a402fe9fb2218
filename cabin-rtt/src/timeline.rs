use cabin_core::{ResultRow, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::ewma::{EwmaConfig, EwmaEstimator};
use crate::probe::{parse_probe_output, ProbeSample};

/// Estimator state after one sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RttRow {
    /// Sample index times the probe interval
    pub time_ms: f64,
    pub sample_rtt: f64,
    pub estimated_rtt: f64,
    pub deviation: f64,
    pub timeout: f64,
}

impl ResultRow for RttRow {
    fn header() -> &'static [&'static str] {
        &["time", "sample_rtt", "estimated_rtt", "deviation", "timeout"]
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.time_ms.to_string(),
            self.sample_rtt.to_string(),
            self.estimated_rtt.to_string(),
            self.deviation.to_string(),
            self.timeout.to_string(),
        ]
    }
}

/// The evolution of an estimator over a series of samples.
///
/// State accumulates across targets: a sample from a new target updates
/// the same average as every sample before it.
#[derive(Debug, Clone)]
pub struct RttTimeline {
    estimator: EwmaEstimator,
    interval: Duration,
    rows: Vec<RttRow>,
}

impl RttTimeline {
    pub fn new(config: EwmaConfig, interval: Duration) -> Result<Self> {
        Ok(Self {
            estimator: EwmaEstimator::new(config)?,
            interval,
            rows: Vec::new(),
        })
    }

    pub fn from_samples(
        config: EwmaConfig,
        interval: Duration,
        samples: &[ProbeSample],
    ) -> Result<Self> {
        let mut timeline = Self::new(config, interval)?;
        for sample in samples {
            timeline.record(sample.rtt_ms)?;
        }
        Ok(timeline)
    }

    pub fn from_probe_output(config: EwmaConfig, interval: Duration, text: &str) -> Result<Self> {
        let samples = parse_probe_output(text);
        debug!("Parsed {} round-trip samples", samples.len());
        Self::from_samples(config, interval, &samples)
    }

    pub fn record(&mut self, sample_rtt: f64) -> Result<&RttRow> {
        let state = self.estimator.update(sample_rtt)?;
        let index = self.rows.len() as f64;
        self.rows.push(RttRow {
            time_ms: index * self.interval.as_secs_f64() * 1000.0,
            sample_rtt,
            estimated_rtt: state.average,
            deviation: state.deviation,
            timeout: state.timeout(self.estimator.config().window),
        });
        let last = self.rows.len() - 1;
        Ok(&self.rows[last])
    }

    pub fn rows(&self) -> &[RttRow] {
        &self.rows
    }

    pub fn estimator(&self) -> &EwmaEstimator {
        &self.estimator
    }

    /// Timeout recommended after the last sample.
    pub fn recommended_timeout(&self) -> Option<f64> {
        self.estimator.timeout()
    }
}
