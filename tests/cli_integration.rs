//! Integration tests for the ArtVault CLI.
//!
//! These tests exercise the binary end-to-end using `assert_cmd`.
//! Passwords come from `ARTVAULT_PASSWORD` so nothing prompts, and each
//! test runs in its own directory with a cheap `.artvault.toml`.

use assert_cmd::Command;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;

const PASSWORD: &str = "correct horse battery";

/// Helper: get a Command pointing at the artvault binary.
fn artvault() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("artvault").expect("binary should exist")
}

/// A project directory with fast KDF settings and a private secret dir.
fn project() -> TempDir {
    let tmp = TempDir::new().unwrap();
    tmp.child(".artvault.toml")
        .write_str(
            "kdf_memory_kib = 8192\n\
             kdf_iterations = 1\n\
             kdf_parallelism = 1\n\
             erase_passes = 1\n\
             session_secret_dir = \"secrets\"\n",
        )
        .unwrap();
    tmp
}

fn run(tmp: &TempDir) -> Command {
    let mut cmd = artvault();
    cmd.current_dir(tmp.path())
        .env("ARTVAULT_PASSWORD", PASSWORD)
        .env_remove("ARTVAULT_NEW_PASSWORD")
        .env_remove("ARTVAULT_LOG");
    cmd
}

fn register_and_login(tmp: &TempDir) {
    run(tmp)
        .args(["register", "--user", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Registered 'alice'"));
    run(tmp)
        .args(["login", "--user", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Logged in as 'alice'"));
}

#[test]
fn help_flag_shows_usage() {
    artvault()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Zero-knowledge encrypted vault for generated artifacts",
        ))
        .stdout(predicate::str::contains("register"))
        .stdout(predicate::str::contains("login"))
        .stdout(predicate::str::contains("add"))
        .stdout(predicate::str::contains("export"))
        .stdout(predicate::str::contains("search"))
        .stdout(predicate::str::contains("rotate-password"));
}

#[test]
fn version_flag_shows_version() {
    artvault()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("artvault"));
}

#[test]
fn no_args_shows_help() {
    artvault()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn list_without_login_fails() {
    let tmp = project();
    run(&tmp)
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No active session"));
}

#[test]
fn short_password_is_rejected_on_register() {
    let tmp = project();
    run(&tmp)
        .env("ARTVAULT_PASSWORD", "short")
        .args(["register", "--user", "alice"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("at least 8"));
}

#[test]
fn wrong_password_login_fails() {
    let tmp = project();
    run(&tmp)
        .args(["register", "--user", "alice"])
        .assert()
        .success();
    run(&tmp)
        .env("ARTVAULT_PASSWORD", "not the password")
        .args(["login", "--user", "alice"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid username or password"));
}

#[test]
fn add_export_roundtrip() {
    let tmp = project();
    register_and_login(&tmp);

    let image = tmp.child("fox.png");
    image.write_binary(b"\x89PNG\r\n\x1a\nfake fox").unwrap();

    run(&tmp)
        .args(["add", "fox.png", "--prompt", "A red fox in snow", "--seed", "42"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Encrypted 'fox'"));

    run(&tmp)
        .args(["export", "fox", "-o", "out/fox.png"])
        .assert()
        .success();
    tmp.child("out/fox.png")
        .assert(predicate::path::eq_file(image.path()));

    run(&tmp)
        .args(["export", "fox"])
        .assert()
        .success()
        .stdout(predicate::eq(&b"\x89PNG\r\n\x1a\nfake fox"[..]));

    run(&tmp)
        .args(["show", "fox"])
        .assert()
        .success()
        .stdout(predicate::str::contains("A red fox in snow"))
        .stdout(predicate::str::contains("42"));
}

#[test]
fn list_search_and_delete() {
    let tmp = project();
    register_and_login(&tmp);
    tmp.child("a.png").write_binary(b"aaa").unwrap();
    tmp.child("b.png").write_binary(b"bbb").unwrap();

    run(&tmp)
        .args(["add", "a.png", "--prompt", "misty mountain lake"])
        .assert()
        .success();
    run(&tmp)
        .args(["add", "b.png", "--id", "desert", "--prompt", "desert dunes"])
        .assert()
        .success();

    run(&tmp)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("2 artifact(s)"))
        .stdout(predicate::str::contains("desert"));

    run(&tmp)
        .args(["search", "Mountain"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 artifact(s) match"))
        .stdout(predicate::str::contains("a"))
        .stdout(predicate::str::contains("desert").not());

    run(&tmp)
        .args(["delete", "desert", "--force"])
        .assert()
        .success();
    run(&tmp)
        .args(["export", "desert"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn duplicate_id_needs_replace() {
    let tmp = project();
    register_and_login(&tmp);
    tmp.child("img.png").write_binary(b"v1").unwrap();

    run(&tmp).args(["add", "img.png"]).assert().success();
    run(&tmp)
        .args(["add", "img.png"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    tmp.child("img.png").write_binary(b"v2").unwrap();
    run(&tmp)
        .args(["add", "img.png", "--replace"])
        .assert()
        .success();
    run(&tmp)
        .args(["export", "img"])
        .assert()
        .success()
        .stdout(predicate::eq(&b"v2"[..]));
}

#[test]
fn logout_ends_the_session() {
    let tmp = project();
    register_and_login(&tmp);

    run(&tmp).arg("whoami").assert().success().stdout(predicate::str::contains("alice"));
    run(&tmp)
        .arg("logout")
        .assert()
        .success()
        .stdout(predicate::str::contains("Logged out 'alice'"));
    run(&tmp).arg("whoami").assert().failure();
    run(&tmp)
        .arg("logout")
        .assert()
        .success()
        .stdout(predicate::str::contains("No active session"));
}

#[test]
fn rotate_password_keeps_artifacts() {
    let tmp = project();
    register_and_login(&tmp);
    tmp.child("img.png").write_binary(b"pixels").unwrap();
    run(&tmp).args(["add", "img.png"]).assert().success();

    run(&tmp)
        .env("ARTVAULT_NEW_PASSWORD", "a brand new password")
        .arg("rotate-password")
        .assert()
        .success();
    run(&tmp).arg("logout").assert().success();

    run(&tmp)
        .args(["login", "--user", "alice"])
        .assert()
        .failure();
    run(&tmp)
        .env("ARTVAULT_PASSWORD", "a brand new password")
        .args(["login", "--user", "alice"])
        .assert()
        .success();
    run(&tmp)
        .args(["export", "img"])
        .assert()
        .success()
        .stdout(predicate::eq(&b"pixels"[..]));
}

#[test]
fn completions_for_unknown_shell_fail() {
    artvault()
        .args(["completions", "csh"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown shell"));
}
