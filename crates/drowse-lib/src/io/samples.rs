//! Sample sources: exports of the heart-rate store and CSV recordings.
//!
//! Records look like `{"timestamp": ..., "rrInterval": 812, "isError": false}`,
//! either as an array or keyed by push id. Sanitizing rules:
//!
//! - no usable timestamp: the record is dropped with a warning;
//! - missing `isError`: treated as an error;
//! - missing, non-numeric or non-positive `rrInterval`: the sample becomes invalid.

use crate::signal::{Sample, Timestamp};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord, Trim};
use log::warn;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Anything that can be polled for samples. Returned samples are sorted by timestamp;
/// sources may redeliver old samples, the pipeline cursor filters them.
pub trait SampleSource {
    fn fetch(&mut self) -> Result<Vec<Sample>>;
}

/// Integers pass through, floats truncate, strings may be numeric or a date (UTC, epoch ms).
pub fn parse_timestamp(value: &Value) -> Option<Timestamp> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(s) => parse_timestamp_str(s),
        _ => None,
    }
}

fn parse_timestamp_str(text: &str) -> Option<Timestamp> {
    let text = text.trim();
    if let Ok(v) = text.parse::<i64>() {
        return Some(v);
    }
    if let Ok(v) = text.parse::<f64>() {
        return v.is_finite().then_some(v as i64);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(text, fmt)
            .ok()
            .map(|dt| dt.and_utc().timestamp_millis())
    })
}

fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_error_flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64() != Some(0.0),
        Some(Value::String(s)) => !matches!(s.trim().to_ascii_lowercase().as_str(), "false" | "0"),
        _ => true,
    }
}

/// Convert one store record. `None` when the record has no usable timestamp.
pub fn sample_from_record(record: &Value) -> Option<Sample> {
    let timestamp = record.get("timestamp").and_then(parse_timestamp)?;
    let is_error = parse_error_flag(record.get("isError"));
    let rr = record.get("rrInterval").and_then(parse_number);
    Some(match rr {
        Some(rr) if !is_error => Sample::new(timestamp, rr),
        _ => Sample::invalid(timestamp),
    })
}

/// Parse a JSON export (keyed object or array of records), sorted by timestamp.
pub fn parse_samples_json(text: &str) -> Result<Vec<Sample>> {
    let root: Value = serde_json::from_str(text).context("parsing sample export")?;
    let records: Vec<(String, &Value)> = match &root {
        Value::Null => Vec::new(),
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("#{i}"), v))
            .collect(),
        _ => bail!("sample export must be an object or an array of records"),
    };
    let mut samples = Vec::with_capacity(records.len());
    for (key, record) in records {
        match sample_from_record(record) {
            Some(sample) => samples.push(sample),
            None => warn!("dropping record {key}: missing or unreadable timestamp"),
        }
    }
    samples.sort_by_key(|s| s.timestamp);
    Ok(samples)
}

pub fn read_samples_json(path: &Path) -> Result<Vec<Sample>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_samples_json(&text).with_context(|| format!("in {}", path.display()))
}

/// Parse CSV with a `timestamp` column, an `rr_interval` (or `rrInterval`) column and
/// optionally `valid` or `isError`.
pub fn parse_samples_csv<R: std::io::Read>(reader: R) -> Result<Vec<Sample>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader);
    let headers = reader.headers().context("reading header")?.clone();
    let ts_idx = locate_column(&headers, &["timestamp"]).context("missing timestamp column")?;
    let rr_idx = locate_column(&headers, &["rr_interval", "rrInterval"])
        .context("missing rr_interval column")?;
    let valid_idx = locate_column(&headers, &["valid"]);
    let error_idx = locate_column(&headers, &["isError", "is_error"]);

    let mut samples = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading record {}", line + 1))?;
        let Some(timestamp) = record.get(ts_idx).and_then(parse_timestamp_str) else {
            warn!("dropping csv record {}: unreadable timestamp", line + 1);
            continue;
        };
        let rr = record.get(rr_idx).and_then(|v| v.parse::<f64>().ok());
        let flagged = match (valid_idx, error_idx) {
            (Some(idx), _) => !is_truthy(record.get(idx)),
            (None, Some(idx)) => is_truthy(record.get(idx)),
            (None, None) => false,
        };
        samples.push(match rr {
            Some(rr) if !flagged => Sample::new(timestamp, rr),
            _ => Sample::invalid(timestamp),
        });
    }
    samples.sort_by_key(|s| s.timestamp);
    Ok(samples)
}

fn locate_column(headers: &StringRecord, names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
}

fn is_truthy(cell: Option<&str>) -> bool {
    matches!(
        cell.map(|c| c.to_ascii_lowercase()).as_deref(),
        Some("true" | "1" | "yes")
    )
}

pub fn read_samples_csv(path: &Path) -> Result<Vec<Sample>> {
    let file =
        std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    parse_samples_csv(file).with_context(|| format!("in {}", path.display()))
}

/// Pick the reader from the file extension: `.csv` is CSV, anything else JSON.
pub fn read_samples(path: &Path) -> Result<Vec<Sample>> {
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
    if is_csv {
        read_samples_csv(path)
    } else {
        read_samples_json(path)
    }
}

/// Re-reads a whole export file on every poll, the way the store is pulled.
#[derive(Debug, Clone)]
pub struct SnapshotFileSource {
    path: PathBuf,
    retries: usize,
    retry_delay: Duration,
}

impl SnapshotFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            retries: 3,
            retry_delay: Duration::from_millis(200),
        }
    }

    /// Extra attempts after a failed read before the error is surfaced.
    pub fn with_retries(mut self, retries: usize, delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = delay;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SampleSource for SnapshotFileSource {
    fn fetch(&mut self) -> Result<Vec<Sample>> {
        let mut attempt = 0;
        loop {
            match read_samples(&self.path) {
                Ok(samples) => return Ok(samples),
                Err(err) if attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        "reading {} failed (attempt {attempt}/{}): {err:#}",
                        self.path.display(),
                        self.retries + 1
                    );
                    std::thread::sleep(self.retry_delay);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn keyed_export_is_sorted_and_sanitized() {
        let text = r#"{
            "-b": {"timestamp": 2000, "rrInterval": 790, "isError": false},
            "-a": {"timestamp": 1000, "rrInterval": 810, "isError": false},
            "-c": {"timestamp": 3000, "rrInterval": 805, "isError": true},
            "-d": {"timestamp": 4000, "rrInterval": 0, "isError": false},
            "-e": {"timestamp": 5000, "rrInterval": 800},
            "-f": {"rrInterval": 800, "isError": false}
        }"#;
        let samples = parse_samples_json(text).unwrap();
        let stamps: Vec<_> = samples.iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![1000, 2000, 3000, 4000, 5000]);
        assert!(samples[0].valid && samples[0].rr_interval == 810.0);
        assert!(samples[1].valid);
        assert!(!samples[2].valid && samples[2].rr_interval == 0.0);
        assert!(!samples[3].valid);
        assert!(!samples[4].valid, "missing isError defaults to error");
    }

    #[test]
    fn garbled_interval_is_invalid_not_zero_valid() {
        let s = sample_from_record(&json!({"timestamp": 1, "rrInterval": "n/a", "isError": false}))
            .unwrap();
        assert!(!s.valid);
        let s = sample_from_record(&json!({"timestamp": 2, "isError": false})).unwrap();
        assert!(!s.valid);
    }

    #[test]
    fn date_strings_become_epoch_millis() {
        assert_eq!(
            parse_timestamp(&json!("1970-01-01 00:00:01.500")),
            Some(1500)
        );
        assert_eq!(parse_timestamp(&json!("1970-01-01T00:00:02Z")), Some(2000));
        assert_eq!(parse_timestamp(&json!("42")), Some(42));
        assert_eq!(parse_timestamp(&json!(12.9)), Some(12));
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
        assert_eq!(parse_timestamp(&json!(null)), None);
    }

    #[test]
    fn null_export_is_empty() {
        assert!(parse_samples_json("null").unwrap().is_empty());
        assert!(parse_samples_json("42").is_err());
    }

    #[test]
    fn csv_with_valid_column() {
        let text = "timestamp,rr_interval,valid\n3,800,true\n1,790,true\n2,0,true\n4,805,false\n";
        let samples = parse_samples_csv(text.as_bytes()).unwrap();
        let stamps: Vec<_> = samples.iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![1, 2, 3, 4]);
        let valid: Vec<_> = samples.iter().map(|s| s.valid).collect();
        assert_eq!(valid, vec![true, false, true, false]);
    }

    #[test]
    fn csv_with_store_column_names() {
        let text = "timestamp,rrInterval,isError\n1,800,false\n2,810,true\nbad,800,false\n";
        let samples = parse_samples_csv(text.as_bytes()).unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples[0].valid);
        assert!(!samples[1].valid);
    }

    #[test]
    fn snapshot_source_rereads_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"[{{"timestamp": 1, "rrInterval": 800, "isError": false}}]"#).unwrap();
        let mut source = SnapshotFileSource::new(file.path());
        assert_eq!(source.fetch().unwrap().len(), 1);
        std::fs::write(
            file.path(),
            r#"[{"timestamp": 1, "rrInterval": 800, "isError": false},
                {"timestamp": 2, "rrInterval": 805, "isError": false}]"#,
        )
        .unwrap();
        assert_eq!(source.fetch().unwrap().len(), 2);
    }

    #[test]
    fn snapshot_source_gives_up_after_retries() {
        let mut source = SnapshotFileSource::new("/nonexistent/drowse/samples.json")
            .with_retries(1, Duration::from_millis(1));
        assert!(source.fetch().is_err());
    }
}
