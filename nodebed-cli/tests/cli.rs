//! End-to-end checks of the `nodebed` binary against local nodes.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn nodebed(root: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("nodebed").unwrap();
    cmd.arg("--root").arg(root.path()).env_remove("NODEBED_PLUGINS");
    cmd
}

fn init_local(root: &TempDir, count: &str) {
    nodebed(root)
        .args(["init", "--count", count, "--deployment", "local", "--type", "daemon"])
        .args(["--extra", "binary,/bin/sh", "--no-bootstrap"])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("Initialized {} node(s)", count)));
}

#[test]
fn drivers_lists_builtins() {
    let root = TempDir::new().unwrap();
    nodebed(&root)
        .arg("drivers")
        .assert()
        .success()
        .stdout(predicate::str::contains("localdaemon"))
        .stdout(predicate::str::contains("dockerdaemon"));
}

#[test]
fn plugin_manifest_adds_driver() {
    let root = TempDir::new().unwrap();
    let plugins = root.path().join("plugins");
    std::fs::create_dir_all(&plugins).unwrap();
    std::fs::write(
        plugins.join("shell.toml"),
        "protocol = 1\nname = \"shelldaemon\"\nbackend = \"localdaemon\"\n[extras]\nbinary = \"/bin/sh\"\n",
    )
    .unwrap();
    std::fs::write(plugins.join("broken.toml"), "protocol = ").unwrap();

    nodebed(&root)
        .arg("drivers")
        .assert()
        .success()
        .stdout(predicate::str::contains("shelldaemon"));

    // the preset supplies `binary`, so no extras are needed
    nodebed(&root)
        .args(["init", "-c", "1", "--deployment", "shell", "--no-bootstrap"])
        .assert()
        .success();
}

#[test]
fn run_prints_each_node_in_order() {
    let root = TempDir::new().unwrap();
    init_local(&root, "3");

    nodebed(&root)
        .args(["run", "[2,0]", "--", "echo", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"(?s)node\[2\] exit 0.*hello.*node\[0\] exit 0.*hello").unwrap());
}

#[test]
fn timed_run_reports_statistics() {
    let root = TempDir::new().unwrap();
    init_local(&root, "2");

    nodebed(&root)
        .args(["run", "--time", "--", "true"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Executed command < true > on 2 node(s)"))
        .stdout(predicate::str::contains("Time Statistics:"))
        .stdout(predicate::str::contains("Analytic Results:"));

    assert!(root.path().join("results.jsonl").exists());
}

#[test]
fn out_of_range_exits_nonzero() {
    let root = TempDir::new().unwrap();
    init_local(&root, "2");

    nodebed(&root)
        .args(["run", "[0-4]", "--", "true"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("outside of valid range [0-1]"));
}

#[test]
fn second_init_needs_force() {
    let root = TempDir::new().unwrap();
    init_local(&root, "1");

    nodebed(&root)
        .args(["init", "-c", "1", "--extra", "binary,/bin/sh", "--no-bootstrap"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already initialized"));

    nodebed(&root)
        .args(["init", "-c", "1", "--extra", "binary,/bin/sh", "--no-bootstrap", "--force"])
        .assert()
        .success();
}

#[test]
fn stop_without_daemons_reports_every_node() {
    let root = TempDir::new().unwrap();
    init_local(&root, "2");

    nodebed(&root)
        .arg("stop")
        .assert()
        .failure()
        .stderr(predicate::str::contains("node[0]: node is not running"))
        .stderr(predicate::str::contains("node[1]: node is not running"));
}

#[test]
fn start_stop_local_daemons() {
    let root = TempDir::new().unwrap();
    nodebed(&root)
        .args(["init", "-c", "2", "--extra", "binary,/bin/sh", "--extra", "daemon_args,-c"])
        .arg("--no-bootstrap")
        .assert()
        .success();

    nodebed(&root)
        .args(["start", "--", "exec sleep 30"])
        .assert()
        .success();

    nodebed(&root)
        .args(["attr", "get", "1", "pid"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"^\d+\n$").unwrap());

    nodebed(&root).arg("stop").assert().success();
}
