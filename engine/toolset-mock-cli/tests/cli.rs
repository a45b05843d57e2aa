use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn state_dir(root: &Path) -> String {
    root.join("state").to_str().unwrap().to_string()
}

fn init(root: &Path, fixture: &Path, properties: &[&str]) {
    let mut args = vec![
        "init".to_string(),
        "--fixture".to_string(),
        fixture.to_str().unwrap().to_string(),
        "--state-dir".to_string(),
        state_dir(root),
        "--root".to_string(),
        root.to_str().unwrap().to_string(),
    ];
    for property in properties {
        args.push("--property".to_string());
        args.push(property.to_string());
    }
    cargo_bin_cmd!("toolset-mock")
        .args(&args)
        .assert()
        .success()
        .stdout(predicate::str::contains("registered"));
}

fn exec(root: &Path, command: &[&str]) -> assert_cmd::assert::Assert {
    cargo_bin_cmd!("toolset-mock")
        .current_dir(root)
        .args(["exec", "--state-dir", state_dir(root).as_str(), "--"])
        .args(command)
        .assert()
}

fn debug_project() -> TempDir {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("lib.c"), "int f(void) { return 0; }\n").unwrap();
    init(tmp.path(), &fixture_path("compile.mock"), &["variant=debug"]);
    tmp
}

#[test]
fn init_reports_registered_expectations() {
    let tmp = TempDir::new().unwrap();
    cargo_bin_cmd!("toolset-mock")
        .args([
            "init",
            "--fixture",
            fixture_path("compile.mock").to_str().unwrap(),
            "--state-dir",
            state_dir(tmp.path()).as_str(),
            "--root",
            tmp.path().to_str().unwrap(),
            "--property",
            "variant=release",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "registered 1 of 3 expectations for {variant=release}",
        ));
}

#[test]
fn full_build_passes_verify() {
    let tmp = debug_project();
    exec(tmp.path(), &["cc", "-O0", "-g", "-c", "-o", "obj/lib.o", "lib.c"]).success();
    assert!(tmp.path().join("obj/lib.o").exists());
    exec(tmp.path(), &["cc", "-o", "app", "obj/lib.o"]).success();

    cargo_bin_cmd!("toolset-mock")
        .args(["verify", "--state-dir", state_dir(tmp.path()).as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("ok: 2 expectations consumed"));

    cargo_bin_cmd!("toolset-mock")
        .args(["ledger", "--state-dir", state_dir(tmp.path()).as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"matched\": 1"));
}

#[test]
fn mismatch_prints_a_diff_and_fails_verify() {
    let tmp = debug_project();
    exec(tmp.path(), &["cc", "-c", "-o", "obj/lib.o", "lib.c"])
        .failure()
        .stderr(predicate::str::contains("no expectation matched"))
        .stderr(predicate::str::contains("--- expected"));
    assert!(!tmp.path().join("obj/lib.o").exists());

    cargo_bin_cmd!("toolset-mock")
        .args(["verify", "--state-dir", state_dir(tmp.path()).as_str()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("was never invoked"))
        .stderr(predicate::str::contains("matched no expectation: cc -c -o obj/lib.o lib.c"));
}

#[test]
fn unknown_program_is_rejected() {
    let tmp = debug_project();
    exec(tmp.path(), &["ld", "-o", "app"])
        .failure()
        .stderr(predicate::str::contains("unexpected invocation `ld -o app`"));
}

#[test]
fn exec_before_init_fails() {
    let tmp = TempDir::new().unwrap();
    exec(tmp.path(), &["cc", "--version"])
        .failure()
        .stderr(predicate::str::contains("toolset-mock init"));
}

#[test]
fn simulated_failure_forwards_the_exit_code() {
    let tmp = TempDir::new().unwrap();
    let fixture = tmp.path().join("fail.mock");
    fs::write(&fixture, "command ar rc output(libl1.a) exit=3\n").unwrap();
    init(tmp.path(), &fixture, &[]);
    exec(tmp.path(), &["ar", "rc", "libl1.a"]).code(3);
    assert!(!tmp.path().join("libl1.a").exists());
}

#[test]
fn failed_simulation_is_persisted_for_verify() {
    let tmp = TempDir::new().unwrap();
    let fixture = tmp.path().join("absent.mock");
    fs::write(
        &fixture,
        "stub absent.sh\ncommand cc -print-prog-name=ar stdout=script(absent.sh)\n",
    )
    .unwrap();
    init(tmp.path(), &fixture, &[]);
    exec(tmp.path(), &["cc", "-print-prog-name=ar"])
        .failure()
        .stderr(predicate::str::contains("could not be run"));

    cargo_bin_cmd!("toolset-mock")
        .args(["verify", "--state-dir", state_dir(tmp.path()).as_str()])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "was not simulated: cc -print-prog-name=ar",
        ));
}

#[test]
fn invalid_property_is_a_load_error() {
    let tmp = TempDir::new().unwrap();
    cargo_bin_cmd!("toolset-mock")
        .args([
            "init",
            "--fixture",
            fixture_path("compile.mock").to_str().unwrap(),
            "--state-dir",
            state_dir(tmp.path()).as_str(),
            "--property",
            "variant",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E_INVALID_PROPERTY"));
}

#[cfg(unix)]
#[test]
fn installed_shim_delegates_to_stub() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = TempDir::new().unwrap();
    let stub = tmp.path().join("ar.sh");
    fs::write(&stub, "#!/bin/sh\necho /usr/bin/ar\n").unwrap();
    let mut perms = fs::metadata(&stub).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&stub, perms).unwrap();

    let fixture = tmp.path().join("probe.mock");
    fs::write(
        &fixture,
        "stub ar.sh\ncommand cc -print-prog-name=ar stdout=script(ar.sh)\n",
    )
    .unwrap();
    init(tmp.path(), &fixture, &[]);

    let bin = tmp.path().join("bin");
    cargo_bin_cmd!("toolset-mock")
        .args([
            "install",
            "--state-dir",
            state_dir(tmp.path()).as_str(),
            "--bin-dir",
            bin.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("cc"));

    assert_cmd::Command::new(bin.join("cc"))
        .current_dir(tmp.path())
        .env("TOOLSET_MOCK_STATE", state_dir(tmp.path()))
        .arg("-print-prog-name=ar")
        .assert()
        .success()
        .stdout("/usr/bin/ar\n");

    cargo_bin_cmd!("toolset-mock")
        .args(["verify", "--state-dir", state_dir(tmp.path()).as_str()])
        .assert()
        .success();
}
