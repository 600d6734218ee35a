use assert_cmd::Command;
use tempfile::TempDir;

fn vfscache(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("vfscache").unwrap();
    cmd.env("VFSCACHE_CONFIG_DIR", config_dir.path());
    cmd.env("VFSCACHE_LOG", "warn");
    cmd
}

#[test]
fn test_config_path_honors_env_override() {
    let temp = TempDir::new().unwrap();
    let output = vfscache(&temp).args(["config", "path"]).output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(&temp.path().display().to_string()));
    assert!(stdout.contains("config.toml"));
}

#[test]
fn test_config_show_reports_defaults() {
    let temp = TempDir::new().unwrap();
    let output = vfscache(&temp).args(["config", "show"]).output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("not found, showing defaults"));
    assert!(stdout.contains("policy: soft"));
}

#[test]
fn test_simulate_lru_json() {
    let temp = TempDir::new().unwrap();
    let output = vfscache(&temp)
        .args([
            "simulate",
            "--policy",
            "lru",
            "--capacity",
            "8",
            "--paths",
            "32",
            "--rounds",
            "200",
            "--json",
        ])
        .output()
        .unwrap();

    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["policy"], "lru");
    assert_eq!(report["resolves"], 4 * 200);
    assert!(report["stats"]["evictions"].as_u64().unwrap() > 0);
}

#[test]
fn test_simulate_rejects_unknown_policy() {
    let temp = TempDir::new().unwrap();
    let output = vfscache(&temp)
        .args(["simulate", "--policy", "fifo"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}
