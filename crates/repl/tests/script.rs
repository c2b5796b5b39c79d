//! Drives the `tails` binary against script files.

use std::io::Write;
use std::process::Command;

fn tails() -> Command {
    Command::new(env!("CARGO_BIN_EXE_tails"))
}

#[test]
fn test_eval_expression() {
    let out = tails().args(["-e", "3 4 + DUP *"]).output().unwrap();
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "49");
}

#[test]
fn test_eval_smol_expression() {
    let out = tails().args(["--smol", "-e", "3+4*5"]).output().unwrap();
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "23");
}

#[test]
fn test_script_with_definitions() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{{ (# -- #) DUP * }} \"SQUARE\" DEFINE").unwrap();
    writeln!(file).unwrap();
    writeln!(file, "7 SQUARE").unwrap();
    file.flush().unwrap();

    let out = tails().arg(file.path()).output().unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "49");
}

#[test]
fn test_compile_error_exits_nonzero() {
    let out = tails().args(["-e", "1 nosuchword"]).output().unwrap();
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("nosuchword"), "{stderr}");
    assert!(stderr.contains("⬆"), "caret expected: {stderr}");
}

#[test]
fn test_print_words() {
    let out = tails().args(["-e", "3 4 + . NL?"]).output().unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    let mut lines = stdout.lines();
    assert_eq!(lines.next(), Some("7"));
}
