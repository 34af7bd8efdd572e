use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tempfile::{TempDir, tempdir};

const SIM_CONFIG: &str = r#"
[calibration]
# one simulated millisecond per sweep step keeps calibration short
interval_ms = 1

[session]
target = 5.0
time_limit = 0.1
rate = 100.0

[sim]
# jump straight to each deadline instead of sleeping
realtime = false
"#;

fn write_config(dir: &TempDir, extra: &str) -> PathBuf {
    let path = dir.path().join("servo.toml");
    fs::write(&path, format!("{SIM_CONFIG}\n{extra}")).unwrap();
    path
}

fn servo(cfg: &PathBuf) -> Command {
    let mut cmd = Command::cargo_bin("servo").unwrap();
    cmd.arg("--log-level").arg("error").arg("--config").arg(cfg);
    cmd
}

fn json_lines(stdout: &[u8]) -> Vec<(String, serde_json::Value)> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|l| l.starts_with('{'))
        .map(|l| (l.to_string(), serde_json::from_str(l).unwrap()))
        .collect()
}

#[rstest]
fn help_lists_subcommands() {
    Command::cargo_bin("servo")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("run")
                .and(predicate::str::contains("serve"))
                .and(predicate::str::contains("sweep"))
                .and(predicate::str::contains("self-check")),
        );
}

#[rstest]
fn run_emits_ordered_telemetry_then_summary() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");

    let out = servo(&cfg).arg("run").assert().success().get_output().stdout.clone();
    let lines = json_lines(&out);
    assert!(lines.len() >= 6, "too few lines: {lines:?}");

    let (raw, _) = &lines[0];
    let keys = ["\"time\"", "\"deg\"", "\"error\"", "\"pwm_theoretical\"", "\"pwm_actual\"", "\"dir\""];
    let positions: Vec<usize> = keys.iter().map(|k| raw.find(k).unwrap()).collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "key order: {raw}");

    let ticks = &lines[..lines.len() - 1];
    for (_, v) in ticks {
        let reg = v["pwm_actual"].as_u64().unwrap();
        assert!(reg <= 1023);
        assert!(matches!(v["dir"].as_i64().unwrap(), -1..=1));
        let deg = v["deg"].as_f64().unwrap();
        assert!((-180.0..180.0).contains(&deg));
    }
    let times: Vec<f64> = ticks.iter().map(|(_, v)| v["time"].as_f64().unwrap()).collect();
    assert!(times.windows(2).all(|w| w[0] < w[1]));

    let (_, summary) = lines.last().unwrap();
    assert_eq!(summary["ticks"].as_u64().unwrap() as usize, ticks.len());
    assert!(summary["bias"].as_f64().unwrap() > 0.0);
    assert!(summary.get("final_error_pct").is_some());
}

#[rstest]
fn fixed_bias_comes_from_the_command_line() {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("fixed.toml");
    fs::write(
        &cfg,
        SIM_CONFIG.replace("interval_ms = 1", "interval_ms = 1\nmode = \"fixed\""),
    )
    .unwrap();

    let out = servo(&cfg)
        .args(["run", "--bias", "100"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let lines = json_lines(&out);
    let (_, summary) = lines.last().unwrap();
    assert_eq!(summary["bias"].as_f64().unwrap(), 100.0 / 512.0);
}

#[rstest]
fn trace_is_written_as_csv() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");
    let trace = dir.path().join("trace.csv");

    servo(&cfg)
        .arg("run")
        .arg("--trace")
        .arg(&trace)
        .assert()
        .success();

    let text = fs::read_to_string(&trace).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("position,time_s"));
    let first = lines.next().expect("at least one trace row");
    assert!(first.ends_with(",0.0"), "first row is relative to itself: {first}");
    assert!(!trace.with_extension("partial").exists());
}

#[rstest]
#[case::zero_cpr("[encoder]\ncounts_per_rev = 0\n")]
#[case::bad_rotation("[logging]\nrotation = \"weekly\"\n")]
#[case::not_toml("this is not toml")]
fn invalid_config_exits_with_config_code(#[case] extra: &str) {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, extra);
    servo(&cfg)
        .arg("run")
        .assert()
        .code(7)
        .stderr(predicate::str::contains("What happened"));
}

#[rstest]
fn missing_config_reports_json_error() {
    let out = Command::cargo_bin("servo")
        .unwrap()
        .args(["--json", "--config", "/nonexistent/servo.toml", "run"])
        .assert()
        .code(7)
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8_lossy(&out);
    let line = stderr
        .lines()
        .find(|l| l.contains("\"reason\""))
        .unwrap_or_else(|| panic!("no JSON error line in: {stderr}"));
    let v: serde_json::Value = serde_json::from_str(line).unwrap();
    assert_eq!(v["reason"], "Config");
    assert_eq!(v["exit_code"], 7);
}

#[rstest]
fn rejected_override_exits_with_config_code() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");
    servo(&cfg)
        .args(["run", "--rate=0"])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("rate"));
}

#[rstest]
fn serve_runs_one_session_per_accepted_line() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");

    let mut child = servo(&cfg)
        .arg("serve")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    {
        let mut stdin = child.stdin.take().unwrap();
        stdin
            .write_all(b"{\"target\": 4}\nnot json\n{\"time_limit\": 0.05}\n")
            .unwrap();
    }
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());

    let summaries: Vec<_> = json_lines(&output.stdout)
        .into_iter()
        .filter(|(_, v)| v.get("final_error").is_some())
        .collect();
    assert_eq!(summaries.len(), 2);
    // second session is half as long at the same rate
    let t0 = summaries[0].1["ticks"].as_u64().unwrap();
    let t1 = summaries[1].1["ticks"].as_u64().unwrap();
    assert!(t1 < t0, "{t0} vs {t1}");
}

#[rstest]
fn sweep_prints_each_register() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");
    servo(&cfg)
        .args(["sweep", "--steps", "5", "--step", "100", "--interval-ms", "1"])
        .assert()
        .success()
        .stdout("612\n712\n812\n912\n1012\n");
}

#[rstest]
fn self_check_passes_on_the_sim() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");
    let out = servo(&cfg)
        .arg("self-check")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let lines = json_lines(&out);
    let (_, v) = &lines[0];
    assert_eq!(v["passed"], true);
    assert_eq!(v["driver"], "Ready");
    assert_eq!(v["zero_register"], 512);
    assert_eq!(v["encoder_position"], 0);
}

#[cfg(not(feature = "hardware"))]
#[rstest]
fn hardware_backend_needs_the_feature() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");
    servo(&cfg)
        .args(["--backend", "hardware", "self-check"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("hardware backend"));
}
