//! Plain-text RR interval lists, as fed to the one-shot `hrv-*` commands.
//!
//! Values are separated by newlines, commas or whitespace; `#` starts a comment.

use crate::signal::RRSeries;
use anyhow::{bail, Context, Result};
use std::path::Path;

pub fn parse_rr_intervals(text: &str) -> Result<RRSeries> {
    let mut rr = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let content = line.split('#').next().unwrap_or_default();
        for token in content
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
        {
            let interval: f64 = token
                .parse()
                .with_context(|| format!("RR interval {:?} on line {} is not a number", token, idx + 1))?;
            if !(interval.is_finite() && interval > 0.0) {
                bail!("RR interval {} on line {} must be positive", token, idx + 1);
            }
            rr.push(interval);
        }
    }
    if rr.is_empty() {
        bail!("input holds no RR intervals");
    }
    Ok(RRSeries::new(rr))
}

pub fn read_rr_intervals(path: &Path) -> Result<RRSeries> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading RR intervals from {}", path.display()))?;
    parse_rr_intervals(&text).with_context(|| format!("in {}", path.display()))
}
