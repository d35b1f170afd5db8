//! Process-level checks of the daemon's failure exits.

use std::process::Command;

fn sigmad() -> Command {
    Command::new(env!("CARGO_BIN_EXE_sigmad"))
}

#[test]
fn missing_config_exits_nonzero() {
    let output = sigmad().arg("/nonexistent/fleet.toml").output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("reading config"), "stderr: {stderr}");
}

#[test]
fn invalid_config_names_the_problem() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fleet.toml");
    std::fs::write(
        &path,
        format!(
            "workdir = \"{0}\"\nmodel = \"{0}/model.ckpt\"\nworkers = []\n\n[jobs]\n",
            dir.path().display()
        ),
    )
    .unwrap();

    let output = sigmad().arg(&path).output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no workers configured"), "stderr: {stderr}");
}

#[test]
fn no_arguments_prints_usage() {
    let output = sigmad().output().unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Usage"));
}
