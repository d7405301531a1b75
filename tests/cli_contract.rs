use std::fs;
use std::path::Path;
use std::process::Command;

use tempfile::tempdir;

fn run_chatreel(cwd: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_chatreel"))
        .current_dir(cwd)
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("chatreel command should run")
}

fn stderr_of(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn end_before_start_fails_with_config_stage() {
    let dir = tempdir().expect("tempdir");
    let output = run_chatreel(dir.path(), &["--start", "5", "--end", "2", "--preview"]);
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr_of(&output);
    assert!(stderr.contains("[chatreel] config failed:"), "stderr was: {stderr}");
    assert!(stderr.contains("must be larger than start time"), "stderr was: {stderr}");
}

#[test]
fn malformed_bounds_are_rejected() {
    let dir = tempdir().expect("tempdir");
    let output = run_chatreel(dir.path(), &["--bounds", "0:0:200", "--preview"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr_of(&output);
    assert!(stderr.contains("[chatreel] config failed:"), "stderr was: {stderr}");
    assert!(stderr.contains("x:y:width:height"), "stderr was: {stderr}");

    let output = run_chatreel(dir.path(), &["--bounds", "0:0:abc:200", "--preview"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr_of(&output);
    assert!(stderr.contains("[chatreel] config failed:"), "stderr was: {stderr}");
    assert!(stderr.contains("'abc'"), "stderr was: {stderr}");
}

#[test]
fn zero_sized_bounds_fail_validation() {
    let dir = tempdir().expect("tempdir");
    let output = run_chatreel(dir.path(), &["--bounds", "0:0:0:200", "--preview"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output).contains("[chatreel] config failed:"));
}

#[test]
fn missing_transcript_names_the_stage() {
    let dir = tempdir().expect("tempdir");
    let output = run_chatreel(
        dir.path(),
        &["--transcript", "does-not-exist.csv", "--preview"],
    );
    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr_of(&output);
    assert!(stderr.contains("[chatreel] transcript load failed:"), "stderr was: {stderr}");
    assert!(stderr.contains("does-not-exist.csv"), "stderr was: {stderr}");
}

#[test]
fn unreadable_font_names_the_stage() {
    let dir = tempdir().expect("tempdir");
    fs::write(
        dir.path().join("comments.csv"),
        "message_body,message_user_color,content_offset_seconds,commenter_display_name,message_fragments\n\
         hi,,1.0,alice,\n",
    )
    .expect("transcript writes");
    fs::write(dir.path().join("broken.ttf"), b"not a font").expect("font writes");

    let output = run_chatreel(
        dir.path(),
        &[
            "--transcript",
            "comments.csv",
            "--font-path",
            "broken.ttf",
            "--preview",
        ],
    );
    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr_of(&output);
    assert!(stderr.contains("[chatreel] font load failed:"), "stderr was: {stderr}");
}

#[test]
fn version_flag_prints_the_program_name() {
    let dir = tempdir().expect("tempdir");
    let output = run_chatreel(dir.path(), &["--version"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("chatreel "));
}
