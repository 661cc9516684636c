use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("causal-meta").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Causal meta world models"));
}

#[test]
fn test_cli_list() {
    let mut cmd = Command::cargo_bin("causal-meta").unwrap();
    cmd.arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Available environments:"))
        .stdout(predicate::str::contains("causal_chain"))
        .stdout(predicate::str::contains("contextual_cartpole"));
}

#[test]
fn test_cli_rejects_unknown_env() {
    let dir = tempdir().unwrap();
    let mut cmd = Command::cargo_bin("causal-meta").unwrap();
    cmd.args(["train", "mountain_car", "--frames", "10", "--no-progress", "--output"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("mountain_car"));
}

#[test]
fn test_cli_rejects_bad_device() {
    let dir = tempdir().unwrap();
    let mut cmd = Command::cargo_bin("causal-meta").unwrap();
    cmd.args(["train", "--device", "tpu", "--output"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown device"));
}

#[test]
fn test_cli_train_then_mcc() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("small.json");
    std::fs::write(
        &config,
        r#"{
            "model": {"hidden_dims": [8], "context": {"meta": true, "max_context_dim": 2}},
            "loss": {"sampling_times": 1},
            "imagination": {"imagination_horizon": 2},
            "actor": {"mlp": {"hidden_size": 8, "num_layers": 1}},
            "value": {"hidden_size": 8, "num_layers": 1},
            "trainer": {"frames_per_batch": 20, "batch_size": 4, "batch_length": 5, "optim_steps_per_batch": 1}
        }"#,
    )
    .unwrap();
    let output = dir.path().join("run");

    Command::cargo_bin("causal-meta")
        .unwrap()
        .args(["train", "causal_chain", "--frames", "10", "--init-frames", "5", "--tasks", "4", "--no-progress"])
        .arg("--config")
        .arg(&config)
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Saved model"));

    assert!(output.join("train_oracle_context.pt").is_file());
    assert!(output.join("test_oracle_context.pt").is_file());
    assert!(output.join("config.json").is_file());

    Command::cargo_bin("causal-meta")
        .unwrap()
        .arg("mcc")
        .arg(output.join("final"))
        .arg("--oracle-dir")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("MCC (train, pearson)"));

    Command::cargo_bin("causal-meta")
        .unwrap()
        .arg("mcc")
        .arg(output.join("final"))
        .arg("--oracle-dir")
        .arg(&output)
        .args(["--method", "kendall"])
        .assert()
        .failure();
}

#[test]
fn test_cli_default_model_is_meta() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("no_model.json");
    std::fs::write(
        &config,
        r#"{
            "loss": {"sampling_times": 1},
            "imagination": {"imagination_horizon": 2},
            "actor": {"mlp": {"hidden_size": 8, "num_layers": 1}},
            "value": {"hidden_size": 8, "num_layers": 1},
            "trainer": {"frames_per_batch": 20, "batch_size": 2, "batch_length": 5, "optim_steps_per_batch": 1}
        }"#,
    )
    .unwrap();
    let output = dir.path().join("run");

    Command::cargo_bin("causal-meta")
        .unwrap()
        .args(["train", "--frames", "10", "--init-frames", "5", "--tasks", "4", "--no-progress"])
        .arg("--config")
        .arg(&config)
        .arg("--output")
        .arg(&output)
        .assert()
        .success();

    let saved = std::fs::read_to_string(output.join("config.json")).unwrap();
    assert!(saved.contains("\"meta\": true"));

    Command::cargo_bin("causal-meta")
        .unwrap()
        .arg("mcc")
        .arg(output.join("final"))
        .arg("--oracle-dir")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("MCC (train, pearson)"));
}
