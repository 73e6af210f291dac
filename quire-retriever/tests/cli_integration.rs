use anyhow::Result;
use serde_json::Value;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Helper to run the CLI binary with given args
fn run_cli(temp_dir: &TempDir, args: &[&str]) -> Result<Output> {
    let output = Command::new(env!("CARGO_BIN_EXE_quire"))
        .arg("--base-dir")
        .arg(temp_dir.path())
        .args(args)
        .env("RUST_LOG", "error") // Reduce log noise
        .output()?;
    Ok(output)
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Writes a small corpus and a config pointing at it
fn setup_corpus() -> Result<TempDir> {
    let temp_dir = TempDir::new()?;
    std::fs::create_dir_all(temp_dir.path().join("data"))?;
    std::fs::write(
        temp_dir.path().join("data/papers.jsonl"),
        [
            r#"{"id": "gnn", "title": "Graph Neural Networks", "abstract": "Graph neural networks learn node representations by message passing."}"#,
            r#"{"id": "fold", "title": "Protein Folding", "abstract": "Protein folding predicts structure from sequence."}"#,
            r#"{"id": "bandit", "title": "Bandits", "abstract": "Multi-armed bandits trade off exploration and exploitation."}"#,
        ]
        .join("\n"),
    )?;
    std::fs::write(
        temp_dir.path().join("quire.toml"),
        "[embedding]\nbackend = \"hash\"\ndimension = 64\n",
    )?;
    Ok(temp_dir)
}

#[test]
fn test_cli_help() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let output = run_cli(&temp_dir, &["--help"])?;

    assert!(output.status.success());
    let out = stdout(&output);
    for command in ["index", "search", "ask", "ingest", "status"] {
        assert!(out.contains(command), "help is missing {command}");
    }
    Ok(())
}

#[test]
fn test_cli_index_builds_then_loads() -> Result<()> {
    let temp_dir = setup_corpus()?;

    let first = run_cli(&temp_dir, &["index", "--format", "json"])?;
    assert!(first.status.success(), "{}", String::from_utf8_lossy(&first.stderr));
    let report: Value = serde_json::from_str(&stdout(&first))?;
    assert_eq!(report["rebuilt"], true);
    assert_eq!(report["count"], 3);
    assert!(temp_dir.path().join("index/index.bin").exists());

    let second = run_cli(&temp_dir, &["index"])?;
    assert!(second.status.success());
    assert!(stdout(&second).contains("Loaded index"));

    let forced = run_cli(&temp_dir, &["index", "--force"])?;
    assert!(stdout(&forced).contains("Rebuilt index"));
    Ok(())
}

#[test]
fn test_cli_ask_cites_source() -> Result<()> {
    let temp_dir = setup_corpus()?;

    let output = run_cli(
        &temp_dir,
        &[
            "ask",
            "Protein folding predicts structure from sequence.",
            "--format",
            "json",
        ],
    )?;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let answer: Value = serde_json::from_str(&stdout(&output))?;
    assert_eq!(answer["status"], "answered");
    assert_eq!(answer["citations"][0]["doc_id"], "fold");
    assert_eq!(answer["generator"], "extractive");
    Ok(())
}

#[test]
fn test_cli_search_summary() -> Result<()> {
    let temp_dir = setup_corpus()?;

    let output = run_cli(&temp_dir, &["search", "message passing on graphs", "-k", "2"])?;
    assert!(output.status.success());
    assert!(stdout(&output).contains("Found 2 results:"));
    Ok(())
}

#[test]
fn test_cli_ingest_and_status() -> Result<()> {
    let temp_dir = setup_corpus()?;

    let output = run_cli(
        &temp_dir,
        &["ingest", "data/papers.jsonl", "--batch-size", "2", "--format", "json"],
    )?;
    // The ingest path is relative to the working directory, not the base dir
    assert!(!output.status.success());

    let path = temp_dir.path().join("data/papers.jsonl");
    let output = run_cli(
        &temp_dir,
        &["ingest", &path.to_string_lossy(), "--batch-size", "2", "--format", "json"],
    )?;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let report: Value = serde_json::from_str(&stdout(&output))?;
    assert_eq!(report["rows_processed"], 3);
    assert_eq!(report["rows_inserted"], 3);
    assert_eq!(report["corpus_name"], "papers.jsonl");

    let status = run_cli(&temp_dir, &["status", "--format", "json"])?;
    assert!(status.status.success());
    let status: Value = serde_json::from_str(&stdout(&status))?;
    assert_eq!(status["store"]["status"], "ok");
    assert_eq!(status["store"]["count_papers"], 3);
    assert_eq!(status["index"]["present"], false);
    assert_eq!(status["fingerprint"]["stale"], true);

    let answer = run_cli(
        &temp_dir,
        &[
            "ask",
            "Multi-armed bandits trade off exploration and exploitation.",
            "--backend",
            "store",
        ],
    )?;
    assert!(answer.status.success());
    assert!(stdout(&answer).contains("bandit | Bandits"));
    Ok(())
}

#[test]
fn test_cli_invalid_config_fails() -> Result<()> {
    let temp_dir = TempDir::new()?;
    std::fs::write(temp_dir.path().join("quire.toml"), "[embedding]\ndimension = 0\n")?;

    let output = run_cli(&temp_dir, &["status"])?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error:"));
    Ok(())
}
