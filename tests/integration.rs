use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn vakil_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("vakil");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let corpus_dir = root.join("corpus");
    fs::create_dir_all(&corpus_dir).unwrap();
    fs::write(
        corpus_dir.join("contract_act.txt"),
        "Section 27. Agreement in restraint of trade, void.\n\nEvery agreement by which any one is restrained from exercising a lawful profession, trade or business of any kind, is to that extent void.",
    )
    .unwrap();
    fs::write(
        corpus_dir.join("evidence_act.md"),
        "# Section 65B\n\nAdmissibility of electronic records.\n\nAny information contained in an electronic record shall be deemed to be also a document.",
    )
    .unwrap();
    fs::write(corpus_dir.join("ignored.json"), "{\"not\": \"law\"}").unwrap();

    // Embedding and completion providers are disabled so the binary never
    // touches the network.
    let config_content = format!(
        r#"[db]
path = "{root}/data/vakil.sqlite"

[corpus]
path = "{root}/corpus"

[chunking]
chunk_size = 80
chunk_overlap = 10

[embedding]
provider = "disabled"

[llm]
provider = "disabled"

[server]
require_secret = false
"#,
        root = root.display()
    );

    let config_path = config_dir.join("vakil.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_vakil(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = vakil_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run vakil binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_vakil(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/vakil.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_vakil(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_vakil(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_vakil(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_invalid_chunking_config_fails() {
    let (_tmp, config_path) = setup_test_env();
    let content = fs::read_to_string(&config_path)
        .unwrap()
        .replace("chunk_overlap = 10", "chunk_overlap = 80");
    fs::write(&config_path, content).unwrap();

    let (_, stderr, success) = run_vakil(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("chunk_overlap"));
}

#[test]
fn test_ingest_dry_run() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_vakil(&config_path, &["ingest", "--dry-run"]);
    assert!(success, "dry run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("(dry-run)"));
    assert!(stdout.contains("documents found: 2"));
    assert!(!tmp.path().join("data/vakil.sqlite").exists());
}

#[test]
fn test_ingest_writes_chunks() {
    let (_tmp, config_path) = setup_test_env();

    run_vakil(&config_path, &["init"]);
    let (stdout, stderr, success) = run_vakil(&config_path, &["ingest"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents: 2"));
    assert!(!stdout.contains("chunks written: 0"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_ingest_unchanged_corpus_skipped() {
    let (_tmp, config_path) = setup_test_env();

    run_vakil(&config_path, &["ingest"]);
    let (stdout, _, success) = run_vakil(&config_path, &["ingest"]);
    assert!(success);
    assert!(stdout.contains("documents: 0"));
    assert!(stdout.contains("unchanged: 2"));
}

#[test]
fn test_ingest_drops_deleted_source() {
    let (tmp, config_path) = setup_test_env();

    run_vakil(&config_path, &["ingest"]);
    fs::remove_file(tmp.path().join("corpus/evidence_act.md")).unwrap();

    let (stdout, stderr, success) = run_vakil(&config_path, &["ingest"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("unchanged: 1"));
    assert!(stdout.contains("removed: 1"));
}

#[test]
fn test_ingest_missing_corpus_fails() {
    let (tmp, config_path) = setup_test_env();
    fs::remove_dir_all(tmp.path().join("corpus")).unwrap();

    let (_, _, success) = run_vakil(&config_path, &["ingest"]);
    assert!(!success);
}

#[test]
fn test_search_errors_when_embeddings_disabled() {
    let (_tmp, config_path) = setup_test_env();

    run_vakil(&config_path, &["ingest"]);
    let (_, stderr, success) = run_vakil(&config_path, &["search", "restraint of trade"]);
    assert!(!success);
    assert!(stderr.contains("requires embeddings"));
}

#[test]
fn test_search_empty_query() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_vakil(&config_path, &["search", "   "]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_analyze_unsupported_file_fails() {
    let (tmp, config_path) = setup_test_env();
    let path = tmp.path().join("contract.docx");
    fs::write(&path, "binary-ish").unwrap();

    let (_, stderr, success) = run_vakil(&config_path, &["analyze", path.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("unsupported file type"));
}
