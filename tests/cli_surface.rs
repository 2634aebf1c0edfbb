use predicates::prelude::*;

#[test]
fn help_lists_the_subcommands() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("ereservify");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("fetch"))
        .stdout(predicate::str::contains("assemble"));
}

#[test]
fn rust_log_debug_emits_debug_line_to_stderr() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("ereservify");
    cmd.env("RUST_LOG", "debug")
        .args(["assemble", "--manifest", "absent.jsonl", "--out", "absent.pdf"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("parsed cli"));
}
