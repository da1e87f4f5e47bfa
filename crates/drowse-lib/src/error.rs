use std::path::PathBuf;
use thiserror::Error;

/// Rejected pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("window size must be at least 2, got {0}")]
    WindowTooSmall(usize),
    #[error("stride must be within 1..={window_size}, got {stride}")]
    InvalidStride { stride: usize, window_size: usize },
    #[error("max error ratio must be within (0, 1], got {0}")]
    InvalidErrorRatio(f64),
    #[error("sampling rate must be positive and finite, got {0}")]
    InvalidSamplingRate(f64),
    #[error("minimum sample count for {domain} must be at least 2, got {value}")]
    MinimumTooSmall { domain: &'static str, value: usize },
    #[error("failed to read config {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
}
