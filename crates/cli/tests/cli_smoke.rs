//! CLI smoke tests for phasegraph.
//!
//! These tests run the binary against small pipeline files in temporary
//! workspaces and check exit codes, printed output and the files a run
//! leaves behind.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a Command for the phasegraph binary.
fn pg_cmd() -> Command {
  cargo_bin_cmd!("phasegraph")
}

/// Create a temp workspace holding `phasegraph.toml`.
fn workspace(pipeline: &str) -> TempDir {
  let temp = TempDir::new().unwrap();
  fs::write(temp.path().join("phasegraph.toml"), pipeline).unwrap();
  temp
}

fn run_in(temp: &TempDir) -> Command {
  let mut cmd = pg_cmd();
  cmd.arg("--workspace").arg(temp.path()).env_remove("CI_LABEL").env_remove("TOOLCHAIN_DIR");
  cmd
}

fn build_dirs(dir: &Path) -> Vec<String> {
  fs::read_dir(dir)
    .unwrap()
    .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
    .filter(|name| name.starts_with("build_"))
    .collect()
}

const TWO_CONFIGS: &str = r#"
session = "smoke"
default_targets = ["build"]

[configs.b]
[configs.a]

[[targets]]
name = "build"
kind = "matrix"
steps = [{ shell = ": > built" }]
"#;

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  pg_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"))
    .stdout(predicate::str::contains("--list-configs"));
}

#[test]
fn version_flag_works() {
  pg_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("phasegraph"));
}

// =============================================================================
// Configuration handling
// =============================================================================

#[test]
fn list_configs_prints_sorted_ids_and_runs_nothing() {
  let temp = workspace(TWO_CONFIGS);

  run_in(&temp).arg("--list-configs").assert().success().stdout("a\nb\n");

  assert!(build_dirs(temp.path()).is_empty());
  assert!(!temp.path().join("logs").exists());
}

#[test]
fn unknown_config_is_a_setup_error() {
  let temp = workspace(TWO_CONFIGS);

  run_in(&temp)
    .args(["--configs", "bogus"])
    .assert()
    .code(2)
    .stderr(predicate::str::contains("valid configurations: a, b"));

  assert!(build_dirs(temp.path()).is_empty());
}

#[test]
fn unknown_label_is_a_setup_error() {
  let temp = workspace(&format!("{TWO_CONFIGS}\n[labels]\nnightly = [\"a\"]\n"));

  run_in(&temp)
    .env("CI_LABEL", "weekly")
    .assert()
    .code(2)
    .stderr(predicate::str::contains("known labels: nightly"));
}

#[test]
fn missing_pipeline_file_fails() {
  let temp = TempDir::new().unwrap();

  run_in(&temp)
    .assert()
    .code(2)
    .stderr(predicate::str::contains("phasegraph.toml"));
}

#[test]
fn unknown_pipeline_key_fails() {
  let temp = workspace("session = \"smoke\"\ndefault_target = [\"build\"]\n");

  run_in(&temp).assert().code(2).stderr(predicate::str::contains("default_target"));
}

// =============================================================================
// Graph
// =============================================================================

#[test]
fn cycle_is_reported_before_running() {
  let temp = workspace(
    r#"
session = "smoke"

[[targets]]
name = "a"
deps = ["b"]
steps = [{ shell = ": > ran_a" }]

[[targets]]
name = "b"
deps = ["a"]
steps = [{ shell = ": > ran_b" }]
"#,
  );

  run_in(&temp)
    .arg("a")
    .assert()
    .code(2)
    .stderr(predicate::str::contains("a -> b -> a"));

  assert!(!temp.path().join("ran_a").exists());
  assert!(!temp.path().join("ran_b").exists());
}

#[test]
fn dry_run_prints_plan() {
  let temp = workspace(
    r#"
session = "smoke"
default_targets = ["build"]

[configs.k1a]

[[targets]]
name = "configure"
steps = [{ shell = ": > configured" }]

[[targets]]
name = "build"
kind = "matrix"
deps = ["configure"]
steps = [{ shell = ": > built" }]
"#,
  );

  run_in(&temp)
    .arg("--dry-run")
    .assert()
    .success()
    .stdout(predicate::str::contains("1. configure"))
    .stdout(predicate::str::contains("2. build [k1a]"));

  assert!(!temp.path().join("configured").exists());
}

// =============================================================================
// Execution
// =============================================================================

#[cfg(unix)]
#[test]
fn matrix_failure_exits_one_and_keeps_sibling_output() {
  let temp = workspace(
    r#"
session = "smoke"

[configs.c1]
[configs.c2]

[[targets]]
name = "build"
kind = "matrix"
steps = [{ shell = "test $${config} = c2 && : > built" }]

[[targets]]
name = "package"
deps = ["build"]
steps = [{ shell = ": > packaged" }]
"#,
  );

  run_in(&temp)
    .arg("package")
    .assert()
    .code(1)
    .stdout(predicate::str::contains("c1"))
    .stdout(predicate::str::contains("blocked"));

  assert!(temp.path().join("build_c2").join("built").exists());
  assert!(!temp.path().join("build_c1").join("built").exists());
  assert!(!temp.path().join("packaged").exists());

  let report = fs::read_to_string(temp.path().join("logs").join("smoke.json")).unwrap();
  let report: serde_json::Value = serde_json::from_str(&report).unwrap();
  assert_eq!(report["targets"][0]["state"], "failed");
  assert_eq!(report["targets"][1]["state"], "blocked");
  assert!(temp.path().join("logs").join("smoke.log").exists());
}

#[cfg(unix)]
#[test]
fn tolerant_failure_exits_zero() {
  let temp = workspace(
    r#"
session = "smoke"

[[targets]]
name = "clean"
steps = [
  { shell = "exit 1", policy = "tolerant" },
  { shell = ": > cleaned" },
]
"#,
  );

  run_in(&temp).arg("clean").assert().success();

  assert!(temp.path().join("cleaned").exists());
}

#[cfg(unix)]
#[test]
fn toolchain_is_prepended_to_path() {
  let temp = workspace(
    r#"
session = "smoke"

[[targets]]
name = "env"
steps = [{ shell = "echo \"$PATH\" > path.txt; echo \"$TOOLCHAIN_DIR\" > tk.txt" }]
"#,
  );

  run_in(&temp)
    .arg("env")
    .args(["--toolchain", "/opt/k1tools"])
    .env("PATH", "/usr/bin:/bin")
    .assert()
    .success();

  let path = fs::read_to_string(temp.path().join("path.txt")).unwrap();
  assert_eq!(path.trim(), "/opt/k1tools/bin:/usr/bin:/bin");
  let tk = fs::read_to_string(temp.path().join("tk.txt")).unwrap();
  assert_eq!(tk.trim(), "/opt/k1tools");
}

#[cfg(unix)]
#[test]
fn relative_toolchain_resolves_from_invocation_dir() {
  let temp = workspace(
    r#"
session = "smoke"

[configs.k1a]

[[targets]]
name = "build"
kind = "matrix"
steps = [{ shell = "echo \"$PATH\" > path.txt" }]
"#,
  );

  run_in(&temp)
    .current_dir(temp.path())
    .arg("build")
    .args(["--toolchain", "tk"])
    .env("PATH", "/usr/bin:/bin")
    .assert()
    .success();

  let path = fs::read_to_string(temp.path().join("build_k1a").join("path.txt")).unwrap();
  let root = fs::canonicalize(temp.path()).unwrap();
  let expected = format!("{}:/usr/bin:/bin", root.join("tk").join("bin").display());
  assert_eq!(path.trim(), expected);
}

#[cfg(unix)]
#[test]
fn label_selects_validation_subset() {
  let temp = workspace(
    r#"
session = "smoke"

[configs.a]
[configs.b]

[labels]
"fpga-b" = ["b"]

[[targets]]
name = "valid"
kind = "matrix"
configs = "valid"
steps = [{ shell = ": > validated" }]
"#,
  );

  run_in(&temp).arg("valid").env("CI_LABEL", "fpga-b").assert().success();

  assert_eq!(build_dirs(temp.path()), vec!["build_b"]);
}

#[cfg(unix)]
#[test]
fn package_and_params_steps_write_artifacts() {
  let temp = workspace(
    r#"
session = "smoke"

[release]
version = "1.2"
release_id = "7"
commit = "abc123"

[[targets]]
name = "package"
steps = [
  { shell = "mkdir -p install/lib && : > install/lib/libodp.a" },
  { package = "odp" },
  { params = "artifacts/parameters.txt" },
]

[[packages]]
name = "odp"
bundle = "install"
description = "ODP runtime"
depends = [{ name = "k1-toolchain", op = ">=", version = "$${var:toolchain_version}" }]
"#,
  );

  run_in(&temp)
    .arg("package")
    .args(["--output-dir", "out", "--toolchain-version", "2.1"])
    .env("INTEGRATION_BRANCH", "master")
    .assert()
    .success();

  assert!(temp.path().join("out").join("odp-1.2-7.tar.gz").is_file());
  let params = fs::read_to_string(temp.path().join("artifacts").join("parameters.txt")).unwrap();
  assert!(params.contains("version=1.2\n"));
  assert!(params.contains("release_id=7\n"));
  assert!(params.contains("integration_branch=master\n"));
  assert!(params.contains("revision=abc123\n"));
}

#[cfg(unix)]
#[test]
fn json_format_prints_report() {
  let temp = workspace(TWO_CONFIGS);

  let output = run_in(&temp).args(["--format", "json", "--jobs", "1"]).output().unwrap();

  assert!(output.status.success());
  let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(report["session"], "smoke");
  assert_eq!(report["targets"][0]["units"].as_array().unwrap().len(), 2);
  let mut dirs = build_dirs(temp.path());
  dirs.sort();
  assert_eq!(dirs, vec!["build_a", "build_b"]);
}
