use crate::config::{PipelineConfig, RrUnit, Sd2Degeneracy, SpectralMethod};
use crate::signal::RRSeries;
use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

pub const LF_BAND: (f64, f64) = (0.04, 0.15);
pub const HF_BAND: (f64, f64) = (0.15, 0.4);

/// Upper bound on the interpolated grid. Longer grids mean the intervals are
/// not RR values in the configured unit.
const MAX_RESAMPLED_LEN: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HRVTime {
    pub n: usize,
    pub mean_rr: Option<f64>,
    pub sdnn: Option<f64>,
    pub rmssd: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HRVPsd {
    pub lf: Option<f64>,
    pub hf: Option<f64>,
    pub lf_hf: Option<f64>,
    /// `[frequency_hz, density]` pairs of the estimate; empty when it was not computed.
    pub points: Vec<[f64; 2]>,
}

impl HRVPsd {
    fn absent() -> Self {
        Self {
            lf: None,
            hf: None,
            lf_hf: None,
            points: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HRVNonlinear {
    pub sd1: Option<f64>,
    pub sd2: Option<f64>,
}

/// Settings of the frequency-domain estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PsdSettings {
    pub fs: f64,
    pub min_samples: usize,
    pub method: SpectralMethod,
    pub rr_unit: RrUnit,
}

impl Default for PsdSettings {
    fn default() -> Self {
        Self {
            fs: 4.0,
            min_samples: 30,
            method: SpectralMethod::Uniform,
            rr_unit: RrUnit::Milliseconds,
        }
    }
}

/// All HRV fields of one window. Each domain owns a disjoint subset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HrvFeatures {
    pub sdnn: Option<f64>,
    pub lf: Option<f64>,
    pub hf: Option<f64>,
    pub lf_hf: Option<f64>,
    pub sd1: Option<f64>,
    pub sd2: Option<f64>,
}

/// Runs the three HRV domains over a window's valid RR values.
#[derive(Debug, Clone)]
pub struct HrvEngine {
    pub min_time_samples: usize,
    pub min_nonlinear_samples: usize,
    pub psd: PsdSettings,
    pub sd2_degeneracy: Sd2Degeneracy,
}

impl Default for HrvEngine {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl HrvEngine {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            min_time_samples: cfg.min_time_samples,
            min_nonlinear_samples: cfg.min_nonlinear_samples,
            psd: PsdSettings {
                fs: cfg.sampling_rate_hz,
                min_samples: cfg.min_frequency_samples,
                method: cfg.spectral_method,
                rr_unit: cfg.rr_unit,
            },
            sd2_degeneracy: cfg.sd2_degeneracy,
        }
    }

    pub fn compute(&self, rr: &RRSeries) -> HrvFeatures {
        let time = hrv_time(rr, self.min_time_samples);
        let bands = hrv_bands(rr, &self.psd);
        let nonlinear = hrv_nonlinear(rr, self.min_nonlinear_samples, self.sd2_degeneracy);
        HrvFeatures {
            sdnn: time.sdnn,
            lf: bands.lf,
            hf: bands.hf,
            lf_hf: bands.lf_hf,
            sd1: nonlinear.sd1,
            sd2: nonlinear.sd2,
        }
    }
}

/// Time-domain metrics. SDNN uses the Bessel-corrected standard deviation.
pub fn hrv_time(rr: &RRSeries, min_samples: usize) -> HRVTime {
    let n = rr.len();
    let mean_rr = rr.mean();
    if n < min_samples.max(2) {
        return HRVTime {
            n,
            mean_rr,
            sdnn: None,
            rmssd: None,
        };
    }
    let sdnn = rr.sample_variance().map(f64::sqrt);
    let diffs = rr.successive_differences();
    let rmssd = Some((diffs.iter().map(|d| d * d).sum::<f64>() / diffs.len() as f64).sqrt());
    HRVTime {
        n,
        mean_rr,
        sdnn,
        rmssd,
    }
}

/// Band powers of one window, without the spectrum itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandPowers {
    pub lf: Option<f64>,
    pub hf: Option<f64>,
    pub lf_hf: Option<f64>,
}

impl BandPowers {
    fn from_spectrum(freqs: &[f64], powers: &[f64]) -> Self {
        let lf = integrate_band(freqs, powers, LF_BAND);
        let hf = integrate_band(freqs, powers, HF_BAND);
        Self {
            lf: Some(lf),
            hf: Some(hf),
            lf_hf: if hf > 0.0 { Some(lf / hf) } else { None },
        }
    }
}

fn estimate_spectrum(rr: &RRSeries, settings: &PsdSettings) -> Option<(Vec<f64>, Vec<f64>)> {
    if rr.len() < settings.min_samples.max(2) {
        return None;
    }
    match settings.method {
        SpectralMethod::Uniform => welch_psd(&rr.rr, settings.fs),
        SpectralMethod::Resampled => {
            welch_psd(&resample_rr(&rr.rr, settings.rr_unit, settings.fs), settings.fs)
        }
    }
}

/// LF/HF only. This is what the pipeline runs per window.
pub fn hrv_bands(rr: &RRSeries, settings: &PsdSettings) -> BandPowers {
    estimate_spectrum(rr, settings)
        .map(|(freqs, powers)| BandPowers::from_spectrum(&freqs, &powers))
        .unwrap_or_default()
}

/// LF/HF band powers from a single-segment Welch estimate, plus the estimate.
pub fn hrv_psd(rr: &RRSeries, settings: &PsdSettings) -> HRVPsd {
    let Some((freqs, powers)) = estimate_spectrum(rr, settings) else {
        return HRVPsd::absent();
    };
    let bands = BandPowers::from_spectrum(&freqs, &powers);
    HRVPsd {
        lf: bands.lf,
        hf: bands.hf,
        lf_hf: bands.lf_hf,
        points: freqs
            .into_iter()
            .zip(powers)
            .map(|(f, p)| [f, p])
            .collect(),
    }
}

/// Poincaré descriptors. SD2 follows `policy` when its radicand turns negative.
pub fn hrv_nonlinear(rr: &RRSeries, min_samples: usize, policy: Sd2Degeneracy) -> HRVNonlinear {
    if rr.len() < min_samples.max(2) {
        return HRVNonlinear {
            sd1: None,
            sd2: None,
        };
    }
    let sd1 = poincare_sd1(rr);
    let sd2 = match (rr.sample_variance(), sd1) {
        (Some(variance), Some(sd1)) => poincare_sd2(variance, sd1, policy),
        _ => None,
    };
    HRVNonlinear { sd1, sd2 }
}

fn poincare_sd1(rr: &RRSeries) -> Option<f64> {
    let diffs = rr.successive_differences();
    if diffs.is_empty() {
        return None;
    }
    let mean = diffs.iter().sum::<f64>() / diffs.len() as f64;
    let var = diffs.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / diffs.len() as f64;
    Some((0.5 * var).sqrt())
}

/// `sqrt(2 * variance - sd1^2)`. In exact arithmetic the radicand is never
/// negative, so a negative value here is rounding noise on a near-zero SD2.
pub fn poincare_sd2(variance: f64, sd1: f64, policy: Sd2Degeneracy) -> Option<f64> {
    let radicand = 2.0 * variance - sd1 * sd1;
    if !radicand.is_finite() {
        return None;
    }
    if radicand >= 0.0 {
        return Some(radicand.sqrt());
    }
    match policy {
        Sd2Degeneracy::Clamp => Some(0.0),
        Sd2Degeneracy::Absent => None,
    }
}

/// Trapezoidal integral over the bins with `band.0 <= f < band.1`.
/// Fewer than two bins give `+0.0`.
fn integrate_band(freqs: &[f64], powers: &[f64], band: (f64, f64)) -> f64 {
    let in_band: Vec<(f64, f64)> = freqs
        .iter()
        .zip(powers)
        .filter(|(f, _)| **f >= band.0 && **f < band.1)
        .map(|(f, p)| (*f, *p))
        .collect();
    in_band
        .windows(2)
        .map(|w| (w[1].0 - w[0].0) * (w[0].1 + w[1].1) * 0.5)
        .fold(0.0, |acc, area| acc + area)
}

/// One-sided density PSD using a single Hann segment spanning the signal,
/// after removing the mean.
fn welch_psd(signal: &[f64], fs: f64) -> Option<(Vec<f64>, Vec<f64>)> {
    let n = signal.len();
    if n < 2 || !(fs > 0.0) {
        return None;
    }
    let mean = signal.iter().sum::<f64>() / n as f64;
    let window = hann(n);
    let window_power: f64 = window.iter().map(|w| w * w).sum();
    if window_power <= 0.0 {
        return None;
    }
    let mut frame: Vec<f64> = signal
        .iter()
        .zip(window.iter())
        .map(|(x, w)| (x - mean) * w)
        .collect();
    let mut planner = RealFftPlanner::<f64>::new();
    let r2c = planner.plan_fft_forward(n);
    let mut spectrum = r2c.make_output_vec();
    r2c.process(&mut frame, &mut spectrum).ok()?;
    let scale = 1.0 / (fs * window_power);
    let freqs = (0..spectrum.len())
        .map(|k| k as f64 * fs / n as f64)
        .collect();
    let powers = spectrum
        .iter()
        .enumerate()
        .map(|(k, val)| {
            let p = val.norm_sqr() * scale;
            if k == 0 || (n % 2 == 0 && k == n / 2) {
                p
            } else {
                2.0 * p
            }
        })
        .collect();
    Some((freqs, powers))
}

/// Linear interpolation of RR values, placed at their beat times, onto a `fs` grid.
fn resample_rr(rr: &[f64], unit: RrUnit, fs: f64) -> Vec<f64> {
    if rr.len() < 2 || !(fs > 0.0) {
        return Vec::new();
    }
    let mut times = Vec::with_capacity(rr.len());
    let mut acc = 0.0;
    for &interval in rr {
        acc += unit.to_seconds(interval);
        times.push(acc);
    }
    let start = times[0];
    let span = times[times.len() - 1] - start;
    if !(span.is_finite() && span > 0.0) {
        return Vec::new();
    }
    let grid_len = (span * fs).floor() + 1.0;
    if !(grid_len.is_finite() && grid_len <= MAX_RESAMPLED_LEN as f64) {
        return Vec::new();
    }
    let n = grid_len as usize;
    let mut signal = Vec::with_capacity(n);
    let mut idx = 0;
    for i in 0..n {
        let t = start + i as f64 / fs;
        while idx + 2 < times.len() && times[idx + 1] < t {
            idx += 1;
        }
        let (t0, t1) = (times[idx], times[idx + 1]);
        let frac = if t1 > t0 {
            ((t - t0) / (t1 - t0)).clamp(0.0, 1.0)
        } else {
            0.0
        };
        signal.push(rr[idx] + frac * (rr[idx + 1] - rr[idx]));
    }
    signal
}

fn hann(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / (size as f64)).cos()))
        .collect()
}
