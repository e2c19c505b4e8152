use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ragfin_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ragfin");
    path
}

/// Build a workspace with an sh-based scraper setup so the tests never
/// depend on a Python interpreter being installed.
fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();
    fs::create_dir_all(root.join("scrapers")).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/ragfin.db"

[scrapers]
dir = "{root}/scrapers"
interpreter = "/bin/sh"
script_glob = "*.sh"
source_globs = ["*.json"]
combined_output = "data.json"
timeout_secs = 2
grace_secs = 1
safety_secs = 30

[chunking]
chunk_chars = 1000
overlap_chars = 150

[server]
bind = "127.0.0.1:7531"
"#,
        root = root.display()
    );

    let config_path = root.join("config").join("ragfin.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ragfin(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ragfin_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ragfin binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn scrapers_dir(config_path: &Path) -> PathBuf {
    config_path.parent().unwrap().parent().unwrap().join("scrapers")
}

fn read_combined(config_path: &Path) -> serde_json::Value {
    let text = fs::read_to_string(scrapers_dir(config_path).join("data.json")).unwrap();
    serde_json::from_str(&text).unwrap()
}

#[test]
fn init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_ragfin(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn init_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, first) = run_ragfin(&config_path, &["init"]);
    assert!(first, "first init failed");
    let (_, _, second) = run_ragfin(&config_path, &["init"]);
    assert!(second, "second init failed (not idempotent)");
}

#[test]
fn scrape_runs_scripts_to_completion() {
    let (_tmp, config_path) = setup_test_env();
    let dir = scrapers_dir(&config_path);

    fs::write(
        dir.join("rbi.sh"),
        "echo '[{\"rbi notice\": {\"content\": \"repo rate\"}}]' > \"$(dirname \"$0\")/rbi.json\"\n",
    )
    .unwrap();
    fs::write(dir.join("itax.sh"), "exit 0\n").unwrap();

    let (stdout, stderr, success) = run_ragfin(&config_path, &["scrape"]);
    assert!(success, "scrape failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("launched: 2"));
    assert!(stdout.contains("completed: 2"));
    assert!(stdout.contains("timed out: 0"));
    assert!(dir.join("rbi.json").exists());
}

#[test]
fn scrape_terminates_runaway_script() {
    let (_tmp, config_path) = setup_test_env();
    let dir = scrapers_dir(&config_path);

    fs::write(dir.join("hang.sh"), "sleep 600\n").unwrap();

    let start = std::time::Instant::now();
    let (stdout, _, success) = run_ragfin(&config_path, &["scrape"]);
    assert!(success);
    assert!(stdout.contains("timed out: 1"));
    // timeout (2s) + grace (1s) + process overhead, well under safety
    assert!(start.elapsed().as_secs() < 20);
}

#[test]
fn combine_merges_mapping_and_array_sources() {
    let (_tmp, config_path) = setup_test_env();
    let dir = scrapers_dir(&config_path);

    fs::write(
        dir.join("a_rbi.json"),
        r#"{"Notice one": {"content": "text one"}, "Notice two": {"content": "text two"}}"#,
    )
    .unwrap();
    fs::write(
        dir.join("b_itax.json"),
        r#"[{"Circular three": {"content": "text three"}}]"#,
    )
    .unwrap();

    let (stdout, stderr, success) = run_ragfin(&config_path, &["combine"]);
    assert!(success, "combine failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("records: 3"));

    let combined = read_combined(&config_path);
    let records = combined.as_array().unwrap();
    assert_eq!(records.len(), 3);
    // Every record is a single-key object.
    for r in records {
        assert_eq!(r.as_object().unwrap().len(), 1);
    }
}

#[test]
fn combine_skips_malformed_files_and_previous_output() {
    let (_tmp, config_path) = setup_test_env();
    let dir = scrapers_dir(&config_path);

    fs::write(dir.join("bad.json"), "{truncated").unwrap();
    fs::write(dir.join("ok.json"), r#"[{"Notice": {"content": "x"}}]"#).unwrap();
    // A stale combined file must not be folded into the new one.
    fs::write(dir.join("data.json"), r#"[{"Stale": {"content": "old"}}]"#).unwrap();

    let (stdout, _, success) = run_ragfin(&config_path, &["combine"]);
    assert!(success);
    assert!(stdout.contains("files skipped: 1"));
    assert!(stdout.contains("records: 1"));

    let combined = read_combined(&config_path);
    let keys: Vec<_> = combined
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r.as_object().unwrap().keys().next().unwrap().clone())
        .collect();
    assert_eq!(keys, vec!["Notice"]);
}

#[test]
fn combine_with_no_sources_writes_empty_array() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_ragfin(&config_path, &["combine"]);
    assert!(success);
    assert!(stdout.contains("records: 0"));
    assert_eq!(read_combined(&config_path), serde_json::json!([]));
}

#[test]
fn index_stores_text_without_embeddings() {
    let (_tmp, config_path) = setup_test_env();
    let dir = scrapers_dir(&config_path);

    fs::write(
        dir.join("data.json"),
        r#"[
            {"RBI raises repo rate": {"url": "https://rbi.org.in/n1.pdf", "content": "The repo rate stands revised to 6.5 per cent with immediate effect."}},
            {"TDS circular": {"content": "Tax deducted at source rates for FY 2024-25 remain unchanged."}},
            {"Empty one": {"content": ""}},
            {"bad": "not an object"}
        ]"#,
    )
    .unwrap();

    run_ragfin(&config_path, &["init"]);
    let (stdout, stderr, success) = run_ragfin(&config_path, &["index"]);
    assert!(success, "index failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("records: 2"));
    assert!(stdout.contains("indexed: 2"));
    assert!(stdout.contains("ok"));
}

#[test]
fn reindexing_unchanged_records_is_a_noop() {
    let (_tmp, config_path) = setup_test_env();
    let dir = scrapers_dir(&config_path);

    fs::write(
        dir.join("data.json"),
        r#"[{"Notice": {"content": "stable content"}}]"#,
    )
    .unwrap();

    run_ragfin(&config_path, &["init"]);
    let (first, _, _) = run_ragfin(&config_path, &["index"]);
    assert!(first.contains("indexed: 1"));

    let (second, _, success) = run_ragfin(&config_path, &["index"]);
    assert!(success);
    assert!(second.contains("indexed: 0"));
    assert!(second.contains("unchanged: 1"));
}

#[test]
fn index_dry_run_reports_counts_without_writing() {
    let (_tmp, config_path) = setup_test_env();
    let dir = scrapers_dir(&config_path);

    fs::write(
        dir.join("data.json"),
        r#"[{"Notice": {"content": "some content"}}]"#,
    )
    .unwrap();

    run_ragfin(&config_path, &["init"]);
    let (stdout, _, success) = run_ragfin(&config_path, &["index", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("dry-run"));
    assert!(stdout.contains("valid records: 1"));

    // Nothing was written: a real index still finds the record new.
    let (stdout, _, _) = run_ragfin(&config_path, &["index"]);
    assert!(stdout.contains("indexed: 1"));
}

#[test]
fn query_requires_embeddings() {
    let (_tmp, config_path) = setup_test_env();

    run_ragfin(&config_path, &["init"]);
    let (_, stderr, success) = run_ragfin(&config_path, &["query", "latest repo rate"]);
    assert!(!success);
    assert!(stderr.contains("embedding"), "stderr: {}", stderr);
}

#[test]
fn pipeline_chains_scrape_combine_index() {
    let (_tmp, config_path) = setup_test_env();
    let dir = scrapers_dir(&config_path);

    fs::write(
        dir.join("scraper.sh"),
        "printf '{\"Combined notice\": {\"content\": \"pipeline content\"}}' > \"$(dirname \"$0\")/out.json\"\n",
    )
    .unwrap();

    run_ragfin(&config_path, &["init"]);
    let (stdout, stderr, success) = run_ragfin(&config_path, &["pipeline"]);
    assert!(success, "pipeline failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("completed: 1"));
    assert!(stdout.contains("records: 1"));
    assert!(stdout.contains("indexed: 1"));
}

#[test]
fn invalid_chunking_config_is_rejected() {
    let (_tmp, config_path) = setup_test_env();

    let bad = fs::read_to_string(&config_path)
        .unwrap()
        .replace("overlap_chars = 150", "overlap_chars = 1000");
    fs::write(&config_path, bad).unwrap();

    let (_, stderr, success) = run_ragfin(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("overlap_chars"));
}
