use crate::config::PipelineConfig;
use crate::signal::{RRSeries, Sample};
use serde::{Deserialize, Serialize};

/// Outcome of screening one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityVerdict {
    pub proceed: bool,
    pub error_count: usize,
    pub valid_values: RRSeries,
}

impl QualityVerdict {
    pub fn valid_count(&self) -> usize {
        self.valid_values.len()
    }
}

/// Rejects windows carrying too many erroneous samples.
#[derive(Debug, Clone, Copy)]
pub struct QualityGate {
    threshold: usize,
}

impl QualityGate {
    /// Windows with `error_count >= threshold` are rejected.
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self::new(cfg.error_threshold())
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn evaluate<'a>(&self, window: impl IntoIterator<Item = &'a Sample>) -> QualityVerdict {
        let mut error_count = 0;
        let mut rr = Vec::new();
        for sample in window {
            if sample.is_usable() {
                rr.push(sample.rr_interval);
            } else {
                error_count += 1;
            }
        }
        QualityVerdict {
            proceed: error_count < self.threshold,
            error_count,
            valid_values: RRSeries::new(rr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(invalid_every: usize, len: usize) -> Vec<Sample> {
        (0..len)
            .map(|i| {
                if invalid_every > 0 && i % invalid_every == 0 {
                    Sample::invalid(i as i64)
                } else {
                    Sample::new(i as i64, 800.0 + (i % 7) as f64)
                }
            })
            .collect()
    }

    #[test]
    fn clean_window_proceeds() {
        let gate = QualityGate::from_config(&PipelineConfig::default());
        let verdict = gate.evaluate(&window(0, 120));
        assert!(verdict.proceed);
        assert_eq!(verdict.error_count, 0);
        assert_eq!(verdict.valid_count(), 120);
    }

    #[test]
    fn threshold_is_inclusive() {
        let gate = QualityGate::new(36);
        let mut samples = window(0, 120);
        for s in samples.iter_mut().take(35) {
            *s = Sample::invalid(s.timestamp);
        }
        assert!(gate.evaluate(&samples).proceed);
        samples[35] = Sample::invalid(35);
        let verdict = gate.evaluate(&samples);
        assert!(!verdict.proceed);
        assert_eq!(verdict.error_count, 36);
        assert_eq!(verdict.valid_count(), 84);
    }

    #[test]
    fn flagged_or_zero_samples_count_as_errors() {
        let samples = vec![
            Sample {
                timestamp: 1,
                rr_interval: 810.0,
                valid: false,
            },
            Sample {
                timestamp: 2,
                rr_interval: 0.0,
                valid: true,
            },
            Sample {
                timestamp: 3,
                rr_interval: f64::NAN,
                valid: true,
            },
            Sample::new(4, 790.0),
        ];
        let verdict = QualityGate::new(36).evaluate(&samples);
        assert_eq!(verdict.error_count, 3);
        assert_eq!(verdict.valid_values.rr, vec![790.0]);
    }

    #[test]
    fn valid_values_keep_arrival_order() {
        let samples = vec![
            Sample::new(1, 900.0),
            Sample::invalid(2),
            Sample::new(3, 700.0),
            Sample::new(4, 800.0),
        ];
        let verdict = QualityGate::new(2).evaluate(&samples);
        assert_eq!(verdict.valid_values.rr, vec![900.0, 700.0, 800.0]);
    }
}
