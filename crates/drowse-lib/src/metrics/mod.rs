pub mod hrv;
pub mod quality;

pub use hrv::{HrvEngine, HrvFeatures};
pub use quality::{QualityGate, QualityVerdict};
