//! Command line tests

#![expect(clippy::tests_outside_test_module, clippy::unwrap_used)]

use assert_cmd::Command;
use nix::unistd::Uid;
use predicates::prelude::*;

//
// Tests acting on real units are only enabled with the int-tests-as-root feature, they modify
// the system unit directory and need a running systemd.
//

fn sdunit() -> Command {
    let mut cmd = Command::cargo_bin(env!("CARGO_PKG_NAME")).unwrap();
    cmd.env_remove("SDUNIT_NAME")
        .env_remove("SDUNIT_DESCRIPTION")
        .env_remove("SDUNIT_VERSION")
        .env_remove("SDUNIT_APP_ID")
        .env_remove("SDUNIT_EXEC");
    cmd
}

#[test]
fn unit_template() {
    sdunit()
        .args([
            "--name",
            "foo",
            "--description",
            "Foo daemon",
            "--exec",
            "/usr/bin/foo",
            "unit",
            "-t",
            "serve",
            "--port",
            "80",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("[Unit]\n").count(1))
        .stdout(predicate::str::contains("Description=Foo daemon\n").count(1))
        .stdout(predicate::str::contains("ExecStart=/usr/bin/foo serve --port 80\n").count(1))
        .stdout(predicate::str::contains("WantedBy=multi-user.target\n").count(1))
        .stdout(predicate::str::contains("%i").count(0));
}

#[test]
fn unit_template_multi() {
    sdunit()
        .args(["--name", "foo", "--exec", "/usr/bin/foo", "unit", "-t", "-m"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ExecStart=/usr/bin/foo --instance %i\n").count(1))
        .stdout(predicate::str::is_match(r"(?m)^Description=.* \(%i\)$").unwrap());
}

#[test]
fn unit_template_env() {
    sdunit()
        .env("SDUNIT_DESCRIPTION", "From env")
        .env("SDUNIT_EXEC", "/opt/bar")
        .args(["unit", "--template"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Description=From env\n").count(1))
        .stdout(predicate::str::contains("ExecStart=/opt/bar\n").count(1));
}

#[test]
fn unit_template_escaping() {
    sdunit()
        .args(["--name", "foo", "--exec", "/usr/bin/foo", "unit", "-t"])
        .args(["$HOME", "hello world", "50%"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains(r#"ExecStart=/usr/bin/foo $$HOME "hello world" 50%%"#)
                .count(1),
        );
    sdunit()
        .args(["--name", "foo", "--exec", "/usr/bin/foo", "unit", "-t"])
        .arg("ok\nExecStartPre=/bin/touch /tmp/pwned")
        .assert()
        .failure()
        .stdout(predicate::str::contains("ExecStartPre").count(0))
        .stderr(predicate::str::contains("Control character"));
}

#[test]
fn unit_not_installed() {
    sdunit()
        .args(["--name", "sdunit-test-not-installed", "unit"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("sdunit-test-not-installed.service"));
}

#[test]
fn unit_hidden() {
    sdunit()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Print systemd unit file").count(0))
        .stdout(predicate::str::contains("Install service unit file").count(1));
}

#[test]
fn mutating_verbs_require_root() {
    if Uid::effective().is_root() {
        return;
    }
    for verb in [
        vec!["install"],
        vec!["remove"],
        vec!["start", "-n", "2"],
        vec!["stop", "-a"],
        vec!["restart"],
        vec!["kill", "a"],
        vec!["reload"],
        vec!["enable"],
        vec!["disable", "b"],
    ] {
        sdunit()
            .args(["--name", "sdunit-test-not-root"])
            .args(&verb)
            .assert()
            .failure()
            .stderr(predicate::str::contains("root privileges required"));
    }
}

#[test]
#[cfg_attr(
    not(feature = "int-tests-as-root"),
    ignore = "int-tests-as-root feature not enabled"
)]
fn lifecycle_as_root() {
    const NAME: &str = "sdunit-int-test";
    let common = ["--name", NAME, "--exec", "/bin/sh"];

    // Instance arguments land in the positional parameters of the shell
    sdunit()
        .args(common)
        .args(["install", "-m", "--", "-c", "sleep 3600"])
        .assert()
        .success();
    sdunit()
        .args(common)
        .args(["unit", "-m"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ExecStart=/bin/sh -c ").count(1))
        .stdout(predicate::str::contains(" --instance %i\n").count(1));
    sdunit()
        .args(common)
        .args(["start", "-n", "2"])
        .assert()
        .success()
        .stderr(predicate::str::contains(format!("Started [ {NAME}@1.service ]")))
        .stderr(predicate::str::contains(format!("Started [ {NAME}@2.service ]")));
    sdunit()
        .args(common)
        .args(["enable", "1"])
        .assert()
        .success();
    sdunit()
        .args(common)
        .args(["disable", "1"])
        .assert()
        .success();
    sdunit()
        .args(common)
        .args(["remove"])
        .assert()
        .success()
        .stderr(predicate::str::contains(format!("Removed {NAME}")));
}
