//! Command-line surface of the pcapfile capture binary.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_exits_cleanly() {
    Command::cargo_bin("wavetap-capture-pcapfile")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--in-fd"))
        .stdout(predicate::str::contains("--connect"));
}

#[test]
fn missing_transport_is_a_startup_failure() {
    Command::cargo_bin("wavetap-capture-pcapfile")
        .unwrap()
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("--connect"));
}

#[test]
fn list_mode_succeeds_with_no_interfaces() {
    // A pcapfile source has nothing to enumerate.
    Command::cargo_bin("wavetap-capture-pcapfile")
        .unwrap()
        .arg("--list")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn half_a_descriptor_pair_is_rejected() {
    Command::cargo_bin("wavetap-capture-pcapfile")
        .unwrap()
        .args(["--in-fd", "3"])
        .assert()
        .failure()
        .code(1);
}
