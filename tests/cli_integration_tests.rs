// CLI behaviour through the compiled binary

use assert_cmd::Command;
use predicates::prelude::*;

fn cli() -> Command {
    let mut cmd = Command::cargo_bin("ballot-pipeline").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn stages_are_listed_in_order() {
    cli()
        .arg("stages")
        .assert()
        .success()
        .stdout(predicate::str::contains("1. CreateValidated <- validate_create"))
        .stdout(predicate::str::contains("7. ResultsComputed <- compute_results"));
}

#[test]
fn config_prints_effective_toml() {
    cli()
        .arg("config")
        .env("BALLOT_PIPELINE__QUEUE__WORKERS", "6")
        .assert()
        .success()
        .stdout(predicate::str::contains("[queue]"))
        .stdout(predicate::str::contains("workers = 6"))
        .stdout(predicate::str::contains("voter_email_rate = \"20/m\""));
}

#[test]
fn simulation_completes_the_election() {
    cli()
        .args(["simulate", "--polls", "2", "--voters", "2", "--workers", "2", "--notify"])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed: yes"))
        .stdout(predicate::str::contains("ResultsComputed"))
        .stdout(predicate::str::contains("reminders: Complete"))
        .stdout(predicate::str::contains("FAILURES").not());
}

#[test]
fn injected_failure_stalls_the_election() {
    cli()
        .args(["simulate", "--polls", "2", "--fail-poll", "0", "--fail-stage", "mix"])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed: no"))
        .stdout(predicate::str::contains("VotingValidated"))
        .stdout(predicate::str::contains("mix failed"));
}

#[test]
fn bad_arguments_are_rejected() {
    cli()
        .args(["simulate", "--polls", "2", "--fail-poll", "5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("out of range"));

    cli()
        .args(["simulate", "--fail-stage", "shuffle"])
        .assert()
        .failure();

    cli()
        .args(["simulate", "--duplicate-rate", "3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("redelivery_probability"));
}
