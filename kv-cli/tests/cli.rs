use assert_cmd::Command;
use predicates::str::contains;

#[test]
fn missing_database_path_is_a_fatal_startup_error() {
    let mut cmd = Command::cargo_bin("memkvd").unwrap();
    cmd.assert().failure().stderr(contains("error"));
}
