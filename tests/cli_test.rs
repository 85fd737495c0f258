//! End-to-end runs of the compiled binary against temp log roots.

mod common;

use assert_cmd::Command;
use chrono::Utc;
use common::{setup_log_root, usage_line, write_jsonl};
use predicates::prelude::*;

fn scope_cmd(root: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("claude-scope").expect("binary builds");
    cmd.env("CLAUDE_SCOPE_ROOTS", root)
        .env("CLAUDE_SCOPE_OFFLINE", "true");
    cmd
}

#[test]
fn daily_report_renders_buckets() -> anyhow::Result<()> {
    let root = setup_log_root()?;
    write_jsonl(
        root.path(),
        "-home-user-app",
        "s1.jsonl",
        &[
            usage_line("2025-06-01T10:00:00Z", "s1", "r1", "m1", 100, 50),
            usage_line("2025-06-02T09:00:00Z", "s1", "r2", "m2", 30, 10),
        ],
    )?;

    scope_cmd(root.path())
        .args(["daily", "--display"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2025-06-01"))
        .stdout(predicate::str::contains("2025-06-02"));
    Ok(())
}

#[test]
fn blocks_reports_hour_floored_window() -> anyhow::Result<()> {
    let root = setup_log_root()?;
    write_jsonl(
        root.path(),
        "-home-user-app",
        "s1.jsonl",
        &[usage_line("2025-06-01T10:23:00Z", "s1", "r1", "m1", 100, 50)],
    )?;

    scope_cmd(root.path())
        .args(["blocks", "--display"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2025-06-01T10:00:00Z"));
    Ok(())
}

#[test]
fn missing_roots_fail_with_json_error() -> anyhow::Result<()> {
    let empty = tempfile::tempdir()?;
    scope_cmd(empty.path())
        .args(["daily"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("error"));
    Ok(())
}

#[test]
fn status_calculate_prices_from_tokens() -> anyhow::Result<()> {
    let root = setup_log_root()?;
    let cache_dir = tempfile::tempdir()?;
    let now = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
    write_jsonl(
        root.path(),
        "-home-user-app",
        "sess-abc.jsonl",
        &[usage_line(&now, "sess-abc", "r1", "m1", 100, 50)],
    )?;

    // --calculate must price from the token counts and the loaded table,
    // not echo the recorded 0.01.
    scope_cmd(root.path())
        .env("CLAUDE_SCOPE_STATUS_CACHE_DIR", cache_dir.path())
        .args(["status", "--session-id", "sess-abc", "--calculate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"active\":true"))
        .stdout(predicate::str::contains("\"costUSD\":0.01,").not());
    Ok(())
}

#[test]
fn since_until_bound_the_report() -> anyhow::Result<()> {
    let root = setup_log_root()?;
    write_jsonl(
        root.path(),
        "-home-user-app",
        "s1.jsonl",
        &[
            usage_line("2025-06-01T10:00:00Z", "s1", "r1", "m1", 100, 50),
            usage_line("2025-06-05T10:00:00Z", "s1", "r2", "m2", 30, 10),
        ],
    )?;

    scope_cmd(root.path())
        .args(["daily", "--display", "--since", "2025-06-03"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2025-06-05"))
        .stdout(predicate::str::contains("2025-06-01").not());
    Ok(())
}
