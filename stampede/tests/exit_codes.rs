use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::Context as _;
use stampede_testserver::{Admission, TestServer, TestServerConfig};
use tokio::time::Duration;

fn status_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn ensure_exit(out: &Output, expected: i32) -> anyhow::Result<()> {
    anyhow::ensure!(
        status_code(out.status) == expected,
        "expected exit code {expected}, got {}\nstdout:\n{}\nstderr:\n{}",
        status_code(out.status),
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );
    Ok(())
}

/// Runs `stampede run <plan> --base-url <api> --output json` off the async runtime.
async fn run_plan(plan: PathBuf, api_url: String, extra: &[&str]) -> anyhow::Result<Output> {
    let exe = env!("CARGO_BIN_EXE_stampede");
    let extra: Vec<String> = extra.iter().map(|s| s.to_string()).collect();

    tokio::task::spawn_blocking(move || {
        Command::new(exe)
            .arg("run")
            .arg(&plan)
            .arg("--base-url")
            .arg(&api_url)
            .arg("--output")
            .arg("json")
            .args(&extra)
            .output()
    })
    .await
    .context("spawn_blocking join")?
    .context("run stampede binary")
}

fn summary_line(out: &Output) -> anyhow::Result<serde_json::Value> {
    let stdout = String::from_utf8_lossy(&out.stdout);
    let line = stdout
        .lines()
        .rev()
        .find(|l| l.contains(r#""kind":"summary""#))
        .with_context(|| format!("no summary line in stdout:\n{stdout}"))?;
    serde_json::from_str(line).context("parse summary line")
}

#[test]
fn invalid_flags_exit_30() -> anyhow::Result<()> {
    let exe = env!("CARGO_BIN_EXE_stampede");

    let out = Command::new(exe)
        .arg("run")
        .arg("./does-not-matter.yaml")
        .arg("--duration")
        .arg("10x")
        .output()
        .context("run stampede binary")?;

    ensure_exit(&out, 30)
}

#[test]
fn missing_plan_exit_30() -> anyhow::Result<()> {
    let exe = env!("CARGO_BIN_EXE_stampede");

    let out = Command::new(exe)
        .arg("validate")
        .arg("./no-such-plan.yaml")
        .output()
        .context("run stampede binary")?;

    ensure_exit(&out, 30)?;
    let stderr = String::from_utf8_lossy(&out.stderr);
    anyhow::ensure!(stderr.contains("failed to read run plan"), "stderr:\n{stderr}");
    Ok(())
}

#[test]
fn invalid_executor_exit_30() -> anyhow::Result<()> {
    let exe = env!("CARGO_BIN_EXE_stampede");

    let out = Command::new(exe)
        .arg("validate")
        .arg(fixture("invalid_executor.yaml"))
        .output()
        .context("run stampede binary")?;

    ensure_exit(&out, 30)?;
    let stderr = String::from_utf8_lossy(&out.stderr);
    anyhow::ensure!(stderr.contains("arrival-rate"), "stderr:\n{stderr}");
    Ok(())
}

#[test]
fn validate_accepts_fixtures() -> anyhow::Result<()> {
    let exe = env!("CARGO_BIN_EXE_stampede");

    for name in ["race.yaml", "steady.yaml", "slow_thresholds.yaml", "forced_abort.yaml"] {
        let out = Command::new(exe)
            .arg("validate")
            .arg(fixture(name))
            .output()
            .context("run stampede binary")?;
        ensure_exit(&out, 0).with_context(|| format!("validate {name}"))?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn success_exit_0() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;

    let out = run_plan(fixture("steady.yaml"), server.api_url(), &["--seed", "7"]).await?;
    let created = server.stats().transactions_created();
    server.shutdown().await;

    ensure_exit(&out, 0)?;
    let summary = summary_line(&out)?;
    anyhow::ensure!(
        summary.pointer("/iterations/completed").and_then(|v| v.as_u64()) == Some(10),
        "summary: {summary}"
    );
    anyhow::ensure!(
        summary.pointer("/race/created").and_then(|v| v.as_u64()) == Some(created),
        "summary: {summary}"
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn thresholds_failed_exit_11() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;

    let out = run_plan(fixture("slow_thresholds.yaml"), server.api_url(), &[]).await?;
    server.shutdown().await;

    ensure_exit(&out, 11)?;
    let summary = summary_line(&out)?;
    anyhow::ensure!(
        summary.pointer("/thresholds/0/verdict").and_then(|v| v.as_str()) == Some("fail"),
        "summary: {summary}"
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn race_detected_exit_13() -> anyhow::Result<()> {
    let server = TestServer::start_with(TestServerConfig {
        limit: 7000.0,
        admission: Admission::Racy {
            window: Duration::from_millis(300),
        },
        ..TestServerConfig::default()
    })
    .await
    .context("start test server")?;

    let out = run_plan(fixture("race.yaml"), server.api_url(), &[]).await?;
    server.shutdown().await;

    ensure_exit(&out, 13)?;
    let summary = summary_line(&out)?;
    anyhow::ensure!(
        summary.pointer("/race/detected").and_then(|v| v.as_bool()) == Some(true),
        "summary: {summary}"
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn setup_failed_exit_20() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;

    let plan = fixture("steady.yaml");
    let text = std::fs::read_to_string(&plan).context("read fixture")?;
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .context("create temp plan")?;
    file.write_all(text.replace("pAsswj@1873", "wrong-password").as_bytes())
        .context("write temp plan")?;

    let out = run_plan(file.path().to_path_buf(), server.api_url(), &[]).await?;
    let transactions = server.stats().transactions_created();
    server.shutdown().await;

    ensure_exit(&out, 20)?;
    anyhow::ensure!(transactions == 0, "transactions created: {transactions}");
    let summary = summary_line(&out)?;
    let err = summary
        .get("setup_error")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    anyhow::ensure!(err.contains("401"), "summary: {summary}");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn forced_abort_exit_21() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;

    let out = run_plan(fixture("forced_abort.yaml"), server.api_url(), &[]).await?;
    server.shutdown().await;

    ensure_exit(&out, 21)?;
    let summary = summary_line(&out)?;
    anyhow::ensure!(
        summary.get("status").and_then(|v| v.as_str()) == Some("forced-abort"),
        "summary: {summary}"
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_target_fails_setup() -> anyhow::Result<()> {
    let out = run_plan(
        fixture("steady.yaml"),
        "http://127.0.0.1:9/api".to_string(),
        &[],
    )
    .await?;

    ensure_exit(&out, 20)
}
