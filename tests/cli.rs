mod common;

use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use common::{stage_comments, stage_submission};

const CREDENTIAL_VARS: &[&str] = &[
    "CF_ACCOUNT_ID",
    "CF_API_TOKEN",
    "GEMINI_API_KEY",
    "GOOGLE_API_KEY",
    "OPENAI_API_KEY",
    "R2_ACCESS_KEY_ID",
    "R2_SECRET_ACCESS_KEY",
    "R2_ENDPOINT",
];

fn tsync_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("tsync");
    path
}

fn setup(sections: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let staged = root.join("staged");
    let day = NaiveDate::from_ymd_opt(2025, 11, 3).unwrap();

    stage_submission(&staged, "rust", day, "t1", "Lifetimes", "Explain please");
    stage_comments(
        &staged,
        "rust",
        day,
        "t1",
        &[("c1", "t3_t1", "Read the book."), ("c2", "t1_c1", "")],
    );

    let config = format!(
        r#"[staging]
root = "{}"
subreddits = ["rust"]
lookback_days = 0

{}
"#,
        staged.display(),
        sections
    );
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let path = config_dir.join("tsync.toml");
    fs::write(&path, config).unwrap();
    (tmp, path)
}

/// Run the binary with all credentials removed from the environment.
fn run_tsync(config_path: &Path, args: &[&str]) -> (String, String, Option<i32>) {
    run_tsync_with_env(config_path, args, &[])
}

fn run_tsync_with_env(
    config_path: &Path,
    args: &[&str],
    env: &[(&str, &str)],
) -> (String, String, Option<i32>) {
    let binary = tsync_binary();
    let mut cmd = Command::new(&binary);
    cmd.arg("--config").arg(config_path).arg("--progress").arg("off");
    for var in CREDENTIAL_VARS {
        cmd.env_remove(var);
    }
    cmd.envs(env.iter().copied());
    let output = cmd
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run tsync binary at {:?}: {}", binary, e));

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.code(),
    )
}

const INDEX: &str = r#"
[embedding]
provider = "gemini"
model = "gemini-embedding-001"
dims = 768

[index]
name = "reddit"
vector_dims = 768
max_vectors_per_run = 100
"#;

#[test]
fn test_index_without_section_is_config_error() {
    let (_tmp, config) = setup("");
    let (_, stderr, code) = run_tsync(&config, &["index"]);
    assert_eq!(code, Some(2), "stderr: {}", stderr);
    assert!(stderr.contains("[index]"));
}

#[test]
fn test_index_without_credentials_is_config_error() {
    let (_tmp, config) = setup(INDEX);
    let (stdout, stderr, code) = run_tsync(&config, &["index"]);
    assert_eq!(code, Some(2), "stderr: {}", stderr);
    assert!(stderr.contains("CF_ACCOUNT_ID"), "stderr: {}", stderr);
    assert!(!stdout.contains("ok"));
}

#[test]
fn test_index_with_disabled_embedding_is_config_error() {
    let (_tmp, config) = setup(
        "[index]\nname = \"reddit\"\nvector_dims = 768\nmax_vectors_per_run = 100\n",
    );
    let (_, stderr, code) = run_tsync_with_env(
        &config,
        &["index"],
        &[("CF_ACCOUNT_ID", "acct"), ("CF_API_TOKEN", "tok")],
    );
    assert_eq!(code, Some(2), "stderr: {}", stderr);
    assert!(stderr.contains("[embedding]"), "stderr: {}", stderr);
}

#[test]
fn test_upload_without_credentials_is_config_error() {
    let (_tmp, config) = setup("[upload]\nbucket = \"archive\"\n");
    let (_, stderr, code) = run_tsync(&config, &["upload"]);
    assert_eq!(code, Some(2), "stderr: {}", stderr);
    assert!(stderr.contains("R2_ACCESS_KEY_ID"), "stderr: {}", stderr);
}

#[test]
fn test_dims_mismatch_is_config_error() {
    let sections = INDEX.replace("vector_dims = 768", "vector_dims = 1536");
    let (_tmp, config) = setup(&sections);
    let (_, stderr, code) = run_tsync(&config, &["index"]);
    assert_eq!(code, Some(2), "stderr: {}", stderr);
    assert!(stderr.contains("vector_dims"));
}

#[test]
fn test_unreadable_config_is_config_error() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("broken.toml");
    fs::write(&path, "[staging\nroot = ").unwrap();
    let (_, _, code) = run_tsync(&path, &["index"]);
    assert_eq!(code, Some(2));

    let (_, _, code) = run_tsync(&tmp.path().join("missing.toml"), &["index"]);
    assert_eq!(code, Some(2));
}

#[test]
fn test_index_dry_run_needs_no_credentials() {
    let (_tmp, config) = setup(INDEX);
    let (stdout, stderr, code) = run_tsync(&config, &["index", "--dry-run"]);
    assert_eq!(code, Some(0), "stderr: {}", stderr);
    assert!(stdout.contains("index run (dry-run)"));
    assert!(stdout.contains("candidates: 2"));
    assert!(stdout.contains("items seen: 2"));
    assert!(stdout.trim_end().ends_with("ok"));
}

#[test]
fn test_upload_dry_run_honours_sub_override() {
    let (_tmp, config) = setup("[upload]\nbucket = \"archive\"\n");
    let (stdout, stderr, code) = run_tsync(&config, &["upload", "--dry-run", "--sub", "golang"]);
    assert_eq!(code, Some(0), "stderr: {}", stderr);
    assert!(stdout.contains("upload run (dry-run)"));
    assert!(stdout.contains("candidates: 0"));
}
