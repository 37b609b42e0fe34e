//! End-to-end exit-code contract.

use assert_cmd::Command;
use predicates::str::contains;

#[test]
fn no_matching_target_exits_with_code_three() {
    Command::cargo_bin("procwatch")
        .unwrap()
        .arg("definitely-not-a-running-process-name-zzz-9183475")
        .arg("--no-display")
        .assert()
        .code(3)
        .stderr(contains("no target matched"));
}

#[test]
fn invalid_filter_regex_exits_with_code_two() {
    Command::cargo_bin("procwatch")
        .unwrap()
        .arg("sshd")
        .arg("--filter")
        .arg("(unterminated")
        .arg("--no-display")
        .assert()
        .code(2)
        .stderr(contains("invalid --filter regex"));
}
