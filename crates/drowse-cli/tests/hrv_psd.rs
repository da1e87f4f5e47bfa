use assert_cmd::cargo::cargo_bin_cmd;
use serde::Deserialize;
use std::error::Error;
use std::path::PathBuf;

#[derive(Deserialize)]
struct HrvPsdOutput {
    lf: Option<f64>,
    hf: Option<f64>,
    lf_hf: Option<f64>,
    points: Vec<[f64; 2]>,
}

fn rr_path() -> String {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(|p| p.parent())
        .expect("workspace root")
        .join("test_data/tiny_rr.txt");
    root.to_string_lossy().to_string()
}

#[test]
fn hrv_psd_command_runs() -> Result<(), Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("drowse");
    cmd.args(["hrv-psd", "--input", &rr_path(), "--fs", "4"]);
    let out = cmd.assert().success().get_output().stdout.clone();
    let value: HrvPsdOutput = serde_json::from_slice(&out)?;
    assert!(value.lf.expect("lf computed") >= 0.0);
    assert!(value.hf.expect("hf computed") > 0.0);
    assert!(value.lf_hf.expect("ratio computed").is_finite());
    assert_eq!(value.points.len(), 21);
    Ok(())
}

#[test]
fn hrv_psd_below_minimum_is_null() -> Result<(), Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("drowse");
    cmd.args(["hrv-psd", "--input", &rr_path(), "--min-samples", "41"]);
    let out = cmd.assert().success().get_output().stdout.clone();
    let value: HrvPsdOutput = serde_json::from_slice(&out)?;
    assert!(value.lf.is_none());
    assert!(value.hf.is_none());
    assert!(value.lf_hf.is_none());
    assert!(value.points.is_empty());
    Ok(())
}

#[test]
fn hrv_psd_reads_stdin() -> Result<(), Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("drowse");
    cmd.args(["hrv-psd", "--min-samples", "2"])
        .write_stdin("800\n810\n790\n805\n");
    let out = cmd.assert().success().get_output().stdout.clone();
    let value: HrvPsdOutput = serde_json::from_slice(&out)?;
    assert!(value.lf.is_some());
    Ok(())
}
