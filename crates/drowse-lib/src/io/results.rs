use crate::pipeline::{HrvResult, ResultSink};
use anyhow::{bail, Context, Result};
use csv::{ReaderBuilder, StringRecord, Trim, Writer, WriterBuilder};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

pub const RESULT_COLUMNS: [&str; 10] = [
    "StartTimestamp",
    "EndTimestamp",
    "ErrorCount",
    "RRCount",
    "SDNN",
    "LF",
    "HF",
    "LF/HF",
    "SD1",
    "SD2",
];

/// Appends one row per evaluated window to a CSV log, writing the header on first use.
pub struct CsvResultLog {
    path: PathBuf,
    writer: Writer<File>,
    rows_written: usize,
}

impl CsvResultLog {
    pub fn open(path: &Path) -> Result<Self> {
        let needs_header = std::fs::metadata(path)
            .map(|meta| meta.len() == 0)
            .unwrap_or(true);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening result log {}", path.display()))?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if needs_header {
            writer.write_record(RESULT_COLUMNS)?;
            writer.flush()?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            rows_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }
}

impl ResultSink for CsvResultLog {
    fn write(&mut self, result: &HrvResult) -> Result<()> {
        self.writer
            .write_record(result_record(result))
            .with_context(|| format!("writing to {}", self.path.display()))?;
        self.writer.flush()?;
        self.rows_written += 1;
        Ok(())
    }
}

fn cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn result_record(r: &HrvResult) -> [String; 10] {
    [
        r.start_timestamp.to_string(),
        r.end_timestamp.to_string(),
        r.error_count.to_string(),
        r.valid_count.to_string(),
        cell(r.sdnn),
        cell(r.lf),
        cell(r.hf),
        cell(r.lf_hf),
        cell(r.sd1),
        cell(r.sd2),
    ]
}

fn parse_optional(record: &StringRecord, idx: usize) -> Result<Option<f64>> {
    match record.get(idx).map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => text
            .parse::<f64>()
            .map(Some)
            .with_context(|| format!("column {} is not numeric: {}", RESULT_COLUMNS[idx], text)),
    }
}

fn parse_required<T: std::str::FromStr>(record: &StringRecord, idx: usize) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text = record
        .get(idx)
        .with_context(|| format!("missing column {}", RESULT_COLUMNS[idx]))?;
    text.trim()
        .parse::<T>()
        .with_context(|| format!("parsing {} from {}", RESULT_COLUMNS[idx], text))
}

/// Read a result log back. Empty cells come back as `None`.
pub fn read_results(path: &Path) -> Result<Vec<HrvResult>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_path(path)
        .with_context(|| format!("opening result log {}", path.display()))?;
    let headers = reader.headers()?.clone();
    if headers.iter().ne(RESULT_COLUMNS.iter().copied()) {
        bail!("unexpected header in {}: {:?}", path.display(), headers);
    }
    let mut results = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading row {}", idx + 1))?;
        results.push(HrvResult {
            start_timestamp: parse_required(&record, 0)?,
            end_timestamp: parse_required(&record, 1)?,
            error_count: parse_required(&record, 2)?,
            valid_count: parse_required(&record, 3)?,
            sdnn: parse_optional(&record, 4)?,
            lf: parse_optional(&record, 5)?,
            hf: parse_optional(&record, 6)?,
            lf_hf: parse_optional(&record, 7)?,
            sd1: parse_optional(&record, 8)?,
            sd2: parse_optional(&record, 9)?,
        });
    }
    Ok(results)
}
