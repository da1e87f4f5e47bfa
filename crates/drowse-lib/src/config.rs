use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How the RR sequence is turned into an evenly sampled signal for the PSD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectralMethod {
    /// Treat consecutive RR values as samples taken at `sampling_rate_hz`.
    #[default]
    Uniform,
    /// Place RR values at their beat times and interpolate onto a `sampling_rate_hz` grid.
    Resampled,
}

/// Unit of incoming RR intervals. Only consulted when resampling onto a time grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RrUnit {
    #[default]
    Milliseconds,
    Seconds,
}

impl RrUnit {
    pub fn to_seconds(self, value: f64) -> f64 {
        match self {
            RrUnit::Milliseconds => value / 1000.0,
            RrUnit::Seconds => value,
        }
    }
}

/// What SD2 becomes when `2 * var - SD1^2` is negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sd2Degeneracy {
    /// Report 0.0.
    #[default]
    Clamp,
    /// Leave SD2 empty.
    Absent,
}

/// Tunables for windowing, gating and HRV estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Samples per analysis window.
    pub window_size: usize,
    /// Samples dropped from the head after each evaluation.
    pub stride: usize,
    /// Windows whose error fraction reaches this ratio are not analysed.
    pub max_error_ratio: f64,
    pub min_time_samples: usize,
    pub min_frequency_samples: usize,
    pub min_nonlinear_samples: usize,
    /// Sampling rate assumed by the Welch estimate (Hz).
    pub sampling_rate_hz: f64,
    pub spectral_method: SpectralMethod,
    pub rr_unit: RrUnit,
    pub sd2_degeneracy: Sd2Degeneracy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_size: 120,
            stride: 1,
            max_error_ratio: 0.30,
            min_time_samples: 2,
            min_frequency_samples: 30,
            min_nonlinear_samples: 2,
            sampling_rate_hz: 4.0,
            spectral_method: SpectralMethod::Uniform,
            rr_unit: RrUnit::Milliseconds,
            sd2_degeneracy: Sd2Degeneracy::Clamp,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: PipelineConfig = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and validate a TOML config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size < 2 {
            return Err(ConfigError::WindowTooSmall(self.window_size));
        }
        if self.stride == 0 || self.stride > self.window_size {
            return Err(ConfigError::InvalidStride {
                stride: self.stride,
                window_size: self.window_size,
            });
        }
        if !(self.max_error_ratio > 0.0 && self.max_error_ratio <= 1.0) {
            return Err(ConfigError::InvalidErrorRatio(self.max_error_ratio));
        }
        if !(self.sampling_rate_hz.is_finite() && self.sampling_rate_hz > 0.0) {
            return Err(ConfigError::InvalidSamplingRate(self.sampling_rate_hz));
        }
        for (domain, value) in [
            ("time domain", self.min_time_samples),
            ("frequency domain", self.min_frequency_samples),
            ("nonlinear domain", self.min_nonlinear_samples),
        ] {
            if value < 2 {
                return Err(ConfigError::MinimumTooSmall { domain, value });
            }
        }
        Ok(())
    }

    /// Error count at which a window is rejected: `ceil(max_error_ratio * window_size)`.
    pub fn error_threshold(&self) -> usize {
        // the product can land a hair above an integer
        let raw = self.max_error_ratio * self.window_size as f64;
        ((raw - 1e-9).ceil().max(1.0)) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_threshold_is_36_of_120() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.error_threshold(), 36);
        cfg.validate().unwrap();
    }

    #[test]
    fn threshold_rounds_up_fractional_counts() {
        let cfg = PipelineConfig {
            window_size: 10,
            max_error_ratio: 0.25,
            ..PipelineConfig::default()
        };
        assert_eq!(cfg.error_threshold(), 3);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = PipelineConfig::from_toml_str(
            "window_size = 60\nmin_frequency_samples = 2\nsd2_degeneracy = \"absent\"\n",
        )
        .unwrap();
        assert_eq!(cfg.window_size, 60);
        assert_eq!(cfg.min_frequency_samples, 2);
        assert_eq!(cfg.sd2_degeneracy, Sd2Degeneracy::Absent);
        assert_eq!(cfg.stride, 1);
        assert_eq!(cfg.spectral_method, SpectralMethod::Uniform);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            PipelineConfig::from_toml_str("stride = 0"),
            Err(ConfigError::InvalidStride { .. })
        ));
        assert!(matches!(
            PipelineConfig::from_toml_str("max_error_ratio = 1.5"),
            Err(ConfigError::InvalidErrorRatio(_))
        ));
        assert!(matches!(
            PipelineConfig::from_toml_str("min_nonlinear_samples = 1"),
            Err(ConfigError::MinimumTooSmall { .. })
        ));
        assert!(matches!(
            PipelineConfig::from_toml_str("window_size = \"big\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn serializes_back_to_toml() {
        let text = toml::to_string(&PipelineConfig::default()).unwrap();
        let cfg = PipelineConfig::from_toml_str(&text).unwrap();
        assert_eq!(cfg, PipelineConfig::default());
    }
}
