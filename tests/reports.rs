use assert_cmd::prelude::*;
use serde_json::{Value, json};
use std::process::Command;

const FIXTURES: &str = "tests/fixtures";

fn gemini_usage() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("gemini-usage"));
    cmd.env("NO_COLOR", "1").env_remove("GEMINI_CONFIG_DIR");
    cmd
}

fn run_json(args: &[&str]) -> Value {
    run_json_priced("tests/fixtures/pricing.json", args)
}

fn run_json_priced(pricing: &str, args: &[&str]) -> Value {
    let output = gemini_usage()
        .args(["--data-dir", FIXTURES, "--config", "tests/fixtures/config.json"])
        .args(["--pricing-file", pricing, "--today", "2026-02-05"])
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("valid json output")
}

fn assert_close(value: &Value, expected: f64) {
    let actual = value.as_f64().expect("numeric cost");
    assert!((actual - expected).abs() < 1e-12, "{actual} != {expected}");
}

#[test]
fn daily_report_matches_fixture() {
    let v = run_json(&["report", "--json"]);
    let rows = v["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["date"], "2026-02-05");
    assert_eq!(rows[1]["date"], "2026-02-04");
    assert!(rows[0].get("model").is_none());

    // Thoughts are billed as output.
    assert_eq!(rows[0]["output"], json!(1000));
    assert_eq!(rows[1]["input"], json!(3000));
    assert_eq!(rows[1]["cached"], json!(1000));
    assert_eq!(rows[1]["output"], json!(500));
    assert_eq!(rows[1]["sessions"], json!(1));

    assert_eq!(v["totals"]["sessions"], json!(2));
    assert_eq!(v["totals"]["total"], json!(6500));
    // pro override (1 / 0.5 / 2) plus built-in flash (0.30 / 0.075 / 2.50)
    assert_close(&rows[0]["cost"], 0.003);
    assert_close(&rows[1]["cost"], 0.002225);
    assert_close(&v["totals"]["cost"], 0.005225);
    assert!(v.get("pricing_warning").is_none());
}

#[test]
fn named_filter_uses_reference_date() {
    let v = run_json(&["report", "--json", "--filter", "today"]);
    assert_eq!(v["filter"], "today");
    assert_eq!(v["since"], "2026-02-05");
    assert_eq!(v["until"], "2026-02-05");
    let rows = v["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["date"], "2026-02-05");

    let v = run_json(&["report", "--json", "--filter", "2026-02-01:2026-02-04"]);
    assert_eq!(v["rows"].as_array().unwrap().len(), 1);
    assert_eq!(v["totals"]["input"], json!(3000));

    let v = run_json(&["report", "--json", "--filter", "last-month"]);
    assert!(v["rows"].as_array().unwrap().is_empty());
    assert_eq!(v["totals"]["cost"], json!(0.0));
}

#[test]
fn grouped_report_has_model_rows_and_totals() {
    let v = run_json(&["report", "--json", "--models"]);
    assert_eq!(v["grouped"], true);
    let rows = v["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["model"], "gemini-2.5-pro");
    assert_eq!(rows[1]["model"], "gemini-2.5-flash");

    let models = v["model_totals"].as_array().unwrap();
    assert_eq!(models.len(), 2);
    assert_eq!(models[0]["model"], "gemini-2.5-flash");
    assert_eq!(models[0]["total"], json!(4500));
    assert_eq!(models[1]["model"], "gemini-2.5-pro");
    assert_eq!(models[1]["sessions"], json!(1));
}

#[test]
fn config_file_supplies_report_defaults() {
    let output = gemini_usage()
        .args(["--data-dir", FIXTURES, "--config", "tests/fixtures/grouped-config.json"])
        .args(["--pricing-file", "tests/fixtures/pricing.json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v: Value = serde_json::from_slice(&output).expect("valid json output");
    assert_eq!(v["grouped"], true);
    assert_eq!(v["model_totals"].as_array().unwrap().len(), 2);
}

#[test]
fn malformed_pricing_falls_back_to_builtin_rates() {
    let v = run_json_priced("tests/fixtures/broken-pricing.json", &["report", "--json"]);
    let warning = v["pricing_warning"].as_str().unwrap();
    assert!(warning.contains("broken-pricing.json"), "{warning}");
    // built-in pro: 1.25 in, 10 out per million
    assert_close(&v["rows"][0]["cost"], 0.01125);
}

#[test]
fn text_report_prints_table() {
    let output = gemini_usage()
        .args(["--data-dir", FIXTURES, "--config", "tests/fixtures/config.json"])
        .args(["--pricing-file", "tests/fixtures/pricing.json"])
        .args(["report", "--models"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).unwrap();
    assert!(text.contains("MODEL"), "{text}");
    assert!(text.contains("TOTAL (gemini-2.5-flash)"), "{text}");
    assert!(text.contains("GRAND TOTAL"), "{text}");
    assert!(text.contains("$0.00"), "{text}");
}

#[test]
fn unknown_filter_is_rejected() {
    let output = gemini_usage()
        .args(["--data-dir", FIXTURES, "--config", "tests/fixtures/config.json"])
        .args(["report", "--filter", "fortnight"])
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).unwrap();
    assert!(stderr.contains("fortnight"), "{stderr}");
}

#[test]
fn unknown_filter_is_rejected_without_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let output = gemini_usage()
        .arg("--data-dir")
        .arg(dir.path())
        .args(["--config", "tests/fixtures/config.json"])
        .args(["report", "--filter", "fortnight"])
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).unwrap();
    assert!(stderr.contains("fortnight"), "{stderr}");
}

#[test]
fn pricing_command_creates_override_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("pricing.json");
    let output = gemini_usage()
        .args(["--data-dir", FIXTURES, "--config", "tests/fixtures/config.json"])
        .arg("--pricing-file")
        .arg(&path)
        .arg("pricing")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).unwrap();
    assert!(text.contains("Pricing file:"), "{text}");
    assert!(text.contains("flash-lite"), "{text}");
    assert!(text.contains("3 session files"), "{text}");

    let created: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(created["models"], json!({}));
}
