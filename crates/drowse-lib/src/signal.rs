use serde::{Deserialize, Serialize};

/// Monotonically comparable sample time. Date strings are normalized to epoch milliseconds.
pub type Timestamp = i64;

/// One RR measurement as delivered by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: Timestamp,
    /// Beat-to-beat interval. `0.0` is the sentinel carried by invalid samples.
    pub rr_interval: f64,
    pub valid: bool,
}

impl Sample {
    /// A usable measurement. Non-positive or non-finite intervals are demoted to invalid.
    pub fn new(timestamp: Timestamp, rr_interval: f64) -> Self {
        if rr_interval.is_finite() && rr_interval > 0.0 {
            Self {
                timestamp,
                rr_interval,
                valid: true,
            }
        } else {
            Self::invalid(timestamp)
        }
    }

    /// A sample flagged as erroneous by the sensor.
    pub fn invalid(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            rr_interval: 0.0,
            valid: false,
        }
    }

    /// True when the sample may be treated as a physiological value.
    pub fn is_usable(&self) -> bool {
        self.valid && self.rr_interval.is_finite() && self.rr_interval > 0.0
    }
}

/// RR intervals of one analysis window, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RRSeries {
    pub rr: Vec<f64>,
}

impl RRSeries {
    pub fn new(rr: Vec<f64>) -> Self {
        Self { rr }
    }

    pub fn len(&self) -> usize {
        self.rr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rr.is_empty()
    }

    /// Usable intervals of `samples`, order preserved.
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a Sample>) -> Self {
        let rr = samples
            .into_iter()
            .filter(|s| s.is_usable())
            .map(|s| s.rr_interval)
            .collect();
        Self { rr }
    }

    pub fn mean(&self) -> Option<f64> {
        if self.rr.is_empty() {
            return None;
        }
        Some(self.rr.iter().sum::<f64>() / self.rr.len() as f64)
    }

    /// Bessel-corrected variance; needs at least two values.
    pub fn sample_variance(&self) -> Option<f64> {
        let n = self.rr.len();
        if n < 2 {
            return None;
        }
        let mean = self.mean()?;
        Some(self.rr.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0))
    }

    /// Successive differences `x[i+1] - x[i]`.
    pub fn successive_differences(&self) -> Vec<f64> {
        self.rr.windows(2).map(|w| w[1] - w[0]).collect()
    }
}
