//! Sliding-window orchestration: samples in, one [`HrvResult`] per full window out.
//!
//! The pipeline owns its window and the timestamp cursor, so independent
//! instances (one per subject, say) never share state.

use crate::config::PipelineConfig;
use crate::error::ConfigError;
use crate::metrics::hrv::{HrvEngine, HrvFeatures};
use crate::metrics::quality::{QualityGate, QualityVerdict};
use crate::signal::{Sample, Timestamp};
use crate::window::WindowBuffer;
use anyhow::Result;
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// One evaluated window. HRV fields are `None` when not computed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HrvResult {
    pub start_timestamp: Timestamp,
    pub end_timestamp: Timestamp,
    pub error_count: usize,
    pub valid_count: usize,
    pub sdnn: Option<f64>,
    pub lf: Option<f64>,
    pub hf: Option<f64>,
    pub lf_hf: Option<f64>,
    pub sd1: Option<f64>,
    pub sd2: Option<f64>,
}

impl HrvResult {
    fn new(start: Timestamp, end: Timestamp, verdict: &QualityVerdict, hrv: HrvFeatures) -> Self {
        Self {
            start_timestamp: start,
            end_timestamp: end,
            error_count: verdict.error_count,
            valid_count: verdict.valid_count(),
            sdnn: hrv.sdnn,
            lf: hrv.lf,
            hf: hrv.hf,
            lf_hf: hrv.lf_hf,
            sd1: hrv.sd1,
            sd2: hrv.sd2,
        }
    }

    pub fn features(&self) -> HrvFeatures {
        HrvFeatures {
            sdnn: self.sdnn,
            lf: self.lf,
            hf: self.hf,
            lf_hf: self.lf_hf,
            sd1: self.sd1,
            sd2: self.sd2,
        }
    }

    pub fn has_features(&self) -> bool {
        self.features() != HrvFeatures::default()
    }
}

/// Destination for evaluated windows.
pub trait ResultSink {
    fn write(&mut self, result: &HrvResult) -> Result<()>;
}

impl ResultSink for Vec<HrvResult> {
    fn write(&mut self, result: &HrvResult) -> Result<()> {
        self.push(*result);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    /// The window has not been full yet.
    Accumulating,
    /// At least one window has been evaluated.
    Evaluating,
}

pub struct HrvPipeline {
    config: PipelineConfig,
    window: WindowBuffer,
    gate: QualityGate,
    engine: HrvEngine,
    last_timestamp: Option<Timestamp>,
    evaluations: usize,
    skipped: usize,
}

impl HrvPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            window: WindowBuffer::new(config.window_size),
            gate: QualityGate::from_config(&config),
            engine: HrvEngine::from_config(&config),
            config,
            last_timestamp: None,
            evaluations: 0,
            skipped: 0,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        if self.evaluations == 0 {
            PipelineState::Accumulating
        } else {
            PipelineState::Evaluating
        }
    }

    pub fn window(&self) -> &WindowBuffer {
        &self.window
    }

    /// Timestamp of the newest accepted sample.
    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.last_timestamp
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Samples dropped because they were not newer than the cursor.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Fold one sample in. Returns a result when the window was full and got evaluated.
    pub fn process_one_sample(&mut self, sample: Sample) -> Option<HrvResult> {
        if !self.admit(sample) {
            return None;
        }
        let result = self.evaluate_if_full()?;
        self.window.slide(self.config.stride);
        Some(result)
    }

    pub fn process_one_batch<I>(&mut self, samples: I) -> Vec<HrvResult>
    where
        I: IntoIterator<Item = Sample>,
    {
        samples
            .into_iter()
            .filter_map(|sample| self.process_one_sample(sample))
            .collect()
    }

    /// Like [`Self::process_one_batch`] but hands each result to `sink` as soon as it exists.
    /// Returns the number of rows written.
    ///
    /// When `sink` fails, the sample that completed the window is taken back out
    /// and the cursor is restored, so redelivering the same samples later writes
    /// the lost row. Samples after it in `samples` are not consumed.
    pub fn process_into<I, S>(&mut self, samples: I, sink: &mut S) -> Result<usize>
    where
        I: IntoIterator<Item = Sample>,
        S: ResultSink + ?Sized,
    {
        let mut written = 0;
        for sample in samples {
            let cursor = self.last_timestamp;
            if !self.admit(sample) {
                continue;
            }
            let Some(result) = self.evaluate_if_full() else {
                continue;
            };
            if let Err(err) = sink.write(&result) {
                self.window.retract_last();
                self.last_timestamp = cursor;
                self.evaluations -= 1;
                return Err(err);
            }
            self.window.slide(self.config.stride);
            written += 1;
        }
        Ok(written)
    }

    /// Dedup against the cursor, then append. The window is never full here
    /// because every evaluation slides it by at least one sample.
    fn admit(&mut self, sample: Sample) -> bool {
        if let Some(last) = self.last_timestamp {
            if sample.timestamp <= last {
                debug!(
                    "dropping sample at {} (cursor at {})",
                    sample.timestamp, last
                );
                self.skipped += 1;
                return false;
            }
        }
        self.last_timestamp = Some(sample.timestamp);
        self.window.append(sample);
        true
    }

    fn evaluate_if_full(&mut self) -> Option<HrvResult> {
        self.window.is_full().then(|| self.evaluate())
    }

    fn evaluate(&mut self) -> HrvResult {
        let start = self.window.first().map(|s| s.timestamp).unwrap_or_default();
        let end = self.window.last().map(|s| s.timestamp).unwrap_or_default();
        let verdict = self.gate.evaluate(self.window.iter());
        self.evaluations += 1;
        let features = if verdict.proceed {
            self.engine.compute(&verdict.valid_values)
        } else {
            info!(
                "too many errors ({} of {}), skipping HRV for window {} to {}",
                verdict.error_count,
                self.window.len(),
                start,
                end
            );
            HrvFeatures::default()
        };
        HrvResult::new(start, end, &verdict, features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(range: std::ops::Range<i64>, rr: f64) -> Vec<Sample> {
        range.map(|ts| Sample::new(ts, rr)).collect()
    }

    fn pipeline() -> HrvPipeline {
        HrvPipeline::new(PipelineConfig::default()).unwrap()
    }

    #[test]
    fn nothing_emitted_before_window_fills() {
        let mut p = pipeline();
        let out = p.process_one_batch(constant(0..119, 800.0));
        assert!(out.is_empty());
        assert_eq!(p.state(), PipelineState::Accumulating);
        assert_eq!(p.window().len(), 119);
    }

    #[test]
    fn full_constant_window_has_zero_variability() {
        let mut p = pipeline();
        p.process_one_batch(constant(0..119, 800.0));
        let row = p.process_one_sample(Sample::new(119, 800.0)).unwrap();
        assert_eq!(p.state(), PipelineState::Evaluating);
        assert_eq!(row.start_timestamp, 0);
        assert_eq!(row.end_timestamp, 119);
        assert_eq!(row.error_count, 0);
        assert_eq!(row.valid_count, 120);
        assert!(row.sdnn.unwrap().abs() < 1e-9);
        assert!(row.sd1.unwrap().abs() < 1e-9);
        assert!(row.sd2.unwrap().abs() < 1e-9);
        assert_eq!(row.lf_hf, None);
        assert_eq!(p.window().len(), 119);
    }

    #[test]
    fn noisy_window_is_rejected_with_metadata() {
        let mut p = pipeline();
        let samples: Vec<Sample> = (0..120)
            .map(|ts| {
                if ts % 3 == 0 {
                    Sample::invalid(ts)
                } else {
                    Sample::new(ts, 800.0 + (ts % 5) as f64)
                }
            })
            .collect();
        let rows = p.process_one_batch(samples);
        assert_eq!(rows.len(), 1);
        let row = rows[0];
        assert_eq!(row.error_count, 40);
        assert_eq!(row.valid_count, 80);
        assert!(!row.has_features());
    }

    #[test]
    fn one_row_per_sample_once_evaluating() {
        let mut p = pipeline();
        let rows = p.process_one_batch(constant(0..150, 800.0));
        assert_eq!(rows.len(), 31);
        assert_eq!(rows[1].start_timestamp, 1);
        assert_eq!(rows[30].end_timestamp, 149);
        assert!(rows.iter().all(|r| r.end_timestamp - r.start_timestamp == 119));
    }

    #[test]
    fn redelivered_samples_are_ignored() {
        let mut p = pipeline();
        p.process_one_batch(constant(0..100, 800.0));
        let rows = p.process_one_batch(constant(50..100, 800.0));
        assert!(rows.is_empty());
        assert_eq!(p.skipped(), 50);
        assert_eq!(p.window().len(), 100);
        assert_eq!(p.last_timestamp(), Some(99));
        let rows = p.process_one_batch(constant(90..125, 800.0));
        assert_eq!(p.skipped(), 60);
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0].end_timestamp, 119);
    }

    #[test]
    fn wider_stride_skips_windows() {
        let cfg = PipelineConfig {
            window_size: 10,
            stride: 5,
            min_frequency_samples: 2,
            ..PipelineConfig::default()
        };
        let mut p = HrvPipeline::new(cfg).unwrap();
        let rows = p.process_one_batch(constant(0..30, 800.0));
        let starts: Vec<_> = rows.iter().map(|r| r.start_timestamp).collect();
        assert_eq!(starts, vec![0, 5, 10, 15, 20]);
    }

    #[test]
    fn process_into_writes_each_row() {
        let mut p = pipeline();
        let mut sink: Vec<HrvResult> = Vec::new();
        let written = p.process_into(constant(0..125, 800.0), &mut sink).unwrap();
        assert_eq!(written, 6);
        assert_eq!(sink.len(), 6);
    }

    struct FlakySink {
        failures_left: usize,
        rows: Vec<HrvResult>,
    }

    impl ResultSink for FlakySink {
        fn write(&mut self, result: &HrvResult) -> Result<()> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                anyhow::bail!("disk full");
            }
            self.rows.push(*result);
            Ok(())
        }
    }

    #[test]
    fn failed_write_is_recovered_on_redelivery() {
        let mut p = pipeline();
        let mut sink = FlakySink {
            failures_left: 1,
            rows: Vec::new(),
        };
        assert!(p.process_into(constant(0..125, 800.0), &mut sink).is_err());
        assert_eq!(p.last_timestamp(), Some(118));
        assert_eq!(p.window().len(), 119);
        assert_eq!(p.state(), PipelineState::Accumulating);

        let written = p.process_into(constant(0..121, 800.0), &mut sink).unwrap();
        assert_eq!(written, 2);
        assert_eq!(p.skipped(), 119);
        assert_eq!(sink.rows[0].start_timestamp, 0);
        assert_eq!(sink.rows[0].end_timestamp, 119);
        assert_eq!(sink.rows[1].end_timestamp, 120);
    }

    #[test]
    fn independent_pipelines_do_not_interact() {
        let mut a = pipeline();
        let mut b = pipeline();
        a.process_one_batch(constant(0..120, 800.0));
        assert_eq!(b.state(), PipelineState::Accumulating);
        assert!(b.process_one_sample(Sample::new(0, 800.0)).is_none());
        assert_eq!(b.window().len(), 1);
    }

    #[test]
    fn rejects_invalid_config() {
        let cfg = PipelineConfig {
            stride: 0,
            ..PipelineConfig::default()
        };
        assert!(HrvPipeline::new(cfg).is_err());
    }
}
