//! # Cabin RTT
//!
//! Round-trip-time estimation for choosing network timeouts.
//!
//! Samples come from probe output ([`probe`]), usually `ping`
//! ([`PingProber`]). An [`EwmaEstimator`] smooths them into an estimated
//! round-trip time and deviation, and [`RttTimeline`] records the estimate
//! after every sample as result rows.
//!
//! ```rust
//! use cabin_rtt::{EwmaConfig, EwmaEstimator, EwmaState};
//!
//! let state = EwmaState { average: 100.0, deviation: 10.0 };
//! let mut estimator = EwmaEstimator::with_state(EwmaConfig::default(), state).unwrap();
//! estimator.update(150.0).unwrap();
//! assert_eq!(estimator.timeout(), Some(180.0));
//! ```

pub mod ewma;
pub mod probe;
pub mod prober;
pub mod timeline;

pub use ewma::{EwmaConfig, EwmaEstimator, EwmaState};
pub use probe::{parse_probe_output, ProbeLine, ProbeParser, ProbeSample};
pub use prober::{probe_all, PingProber, Prober};
pub use timeline::{RttRow, RttTimeline};
