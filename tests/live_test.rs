//! Live monitor cache behavior: incremental ingestion, the retention
//! bound, and the eviction-coupled dedup clear.

mod common;

use chrono::{Duration, Utc};
use claude_scope::live::{LiveMonitor, LiveSettings};
use claude_scope::pricing::CostMode;
use common::{append_jsonl, setup_log_root, usage_line, write_jsonl};
use std::path::Path;
use std::time::Duration as StdDuration;

fn settings(root: &Path) -> LiveSettings {
    LiveSettings {
        roots: vec![root.to_path_buf()],
        block_duration: Duration::hours(5),
        retention: Duration::hours(24),
        read_concurrency: 5,
        dedup_clear_ratio: 0.5,
        refresh_interval: StdDuration::from_secs(3),
    }
}

fn iso(ts: chrono::DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

#[tokio::test]
async fn first_refresh_returns_active_block() -> anyhow::Result<()> {
    let root = setup_log_root()?;
    let now = Utc::now();
    let lines = vec![
        usage_line(&iso(now - Duration::minutes(10)), "s1", "r1", "m1", 100, 50),
        usage_line(&iso(now - Duration::minutes(5)), "s1", "r2", "m2", 200, 80),
    ];
    write_jsonl(root.path(), "-app", "s1.jsonl", &lines)?;

    let mut monitor = LiveMonitor::with_settings(settings(root.path()), None, CostMode::Display);
    let block = monitor.refresh_at(now).await?.expect("active block");
    assert!(block.is_active);
    assert_eq!(block.entry_count, 2);
    assert_eq!(block.token_counts.input, 300);
    Ok(())
}

#[tokio::test]
async fn unchanged_files_are_not_reingested() -> anyhow::Result<()> {
    let root = setup_log_root()?;
    let now = Utc::now();
    let lines = vec![usage_line(&iso(now), "s1", "r1", "m1", 100, 50)];
    write_jsonl(root.path(), "-app", "s1.jsonl", &lines)?;

    let mut monitor = LiveMonitor::with_settings(settings(root.path()), None, CostMode::Display);
    monitor.refresh_at(now).await?;
    assert_eq!(monitor.retained_entries().len(), 1);

    // Two more ticks with nothing changed on disk.
    monitor.refresh_at(now + Duration::seconds(3)).await?;
    monitor.refresh_at(now + Duration::seconds(6)).await?;
    assert_eq!(monitor.retained_entries().len(), 1);
    Ok(())
}

#[tokio::test]
async fn new_file_between_ticks_is_picked_up() -> anyhow::Result<()> {
    let root = setup_log_root()?;
    let now = Utc::now();
    write_jsonl(
        root.path(),
        "-app",
        "s1.jsonl",
        &[usage_line(&iso(now), "s1", "r1", "m1", 100, 50)],
    )?;

    let mut monitor = LiveMonitor::with_settings(settings(root.path()), None, CostMode::Display);
    monitor.refresh_at(now).await?;
    assert_eq!(monitor.retained_entries().len(), 1);

    write_jsonl(
        root.path(),
        "-app",
        "s2.jsonl",
        &[usage_line(&iso(now), "s2", "r2", "m2", 10, 5)],
    )?;
    monitor.refresh_at(now + Duration::seconds(3)).await?;
    assert_eq!(monitor.retained_entries().len(), 2);
    Ok(())
}

#[tokio::test]
async fn append_reads_only_the_tail() -> anyhow::Result<()> {
    let root = setup_log_root()?;
    let now = Utc::now();
    // No requestId: never deduplicable. Only tail-limited re-reads keep a
    // growing file from retaining this entry more than once.
    let keyless = format!(
        r#"{{"timestamp":"{}","sessionId":"s1","message":{{"id":"m1","model":"claude-sonnet-4-20250514","usage":{{"input_tokens":10,"output_tokens":5}}}}}}"#,
        iso(now)
    );
    let path = write_jsonl(root.path(), "-app", "s1.jsonl", &[keyless])?;

    let mut monitor = LiveMonitor::with_settings(settings(root.path()), None, CostMode::Display);
    monitor.refresh_at(now).await?;
    assert_eq!(monitor.retained_entries().len(), 1);

    // Let the mtime advance, then append one keyed line.
    tokio::time::sleep(StdDuration::from_millis(1100)).await;
    append_jsonl(&path, &[usage_line(&iso(now), "s1", "r2", "m2", 20, 5)])?;

    monitor.refresh_at(now + Duration::seconds(3)).await?;
    let retained = monitor.retained_entries();
    assert_eq!(retained.len(), 2);
    assert_eq!(retained.iter().filter(|e| e.request_id.is_none()).count(), 1);

    // A further tick with no change leaves the buffer alone.
    monitor.refresh_at(now + Duration::seconds(6)).await?;
    assert_eq!(monitor.retained_entries().len(), 2);
    Ok(())
}

#[tokio::test]
async fn duplicate_events_across_files_counted_once() -> anyhow::Result<()> {
    let root = setup_log_root()?;
    let now = Utc::now();
    let line = usage_line(&iso(now), "s1", "r_dup", "m_dup", 100, 50);
    write_jsonl(root.path(), "-app", "s1.jsonl", &[line.clone()])?;
    write_jsonl(root.path(), "-app", "s1-copy.jsonl", &[line])?;

    let mut monitor = LiveMonitor::with_settings(settings(root.path()), None, CostMode::Display);
    monitor.refresh_at(now).await?;
    assert_eq!(monitor.retained_entries().len(), 1);
    Ok(())
}

#[tokio::test]
async fn retention_bound_holds_across_ticks() -> anyhow::Result<()> {
    let root = setup_log_root()?;
    let now = Utc::now();
    let lines = vec![
        usage_line(&iso(now - Duration::hours(30)), "s1", "r_old", "m_old", 1, 1),
        usage_line(&iso(now - Duration::hours(1)), "s1", "r_new", "m_new", 2, 2),
    ];
    write_jsonl(root.path(), "-app", "s1.jsonl", &lines)?;

    let mut monitor = LiveMonitor::with_settings(settings(root.path()), None, CostMode::Display);
    monitor.refresh_at(now).await?;

    let cutoff = now - Duration::hours(24);
    assert!(monitor.retained_entries().iter().all(|e| e.timestamp >= cutoff));
    assert_eq!(monitor.retained_entries().len(), 1);
    Ok(())
}

#[tokio::test]
async fn large_eviction_clears_dedup_set() -> anyhow::Result<()> {
    let root = setup_log_root()?;
    let t0 = Utc::now();
    write_jsonl(
        root.path(),
        "-app",
        "s1.jsonl",
        &[usage_line(&iso(t0 - Duration::minutes(50)), "s1", "r_k", "m_k", 100, 50)],
    )?;

    let mut short = settings(root.path());
    short.retention = Duration::hours(1);
    let mut monitor = LiveMonitor::with_settings(short, None, CostMode::Display);
    monitor.refresh_at(t0).await?;
    assert_eq!(monitor.retained_entries().len(), 1);

    // Twenty minutes later the lone entry ages out; evicting the whole
    // buffer must clear the dedup set along with it.
    let t1 = t0 + Duration::minutes(20);
    monitor.refresh_at(t1).await?;
    assert!(monitor.retained_entries().is_empty());

    // Same identity key reappearing in a new file must count again.
    write_jsonl(
        root.path(),
        "-app",
        "s1-rotated.jsonl",
        &[usage_line(&iso(t1), "s1", "r_k", "m_k", 7, 3)],
    )?;
    monitor.refresh_at(t1).await?;
    assert_eq!(monitor.retained_entries().len(), 1);
    assert_eq!(monitor.retained_entries()[0].tokens.input, 7);
    Ok(())
}

#[tokio::test]
async fn clear_cache_forces_full_reread() -> anyhow::Result<()> {
    let root = setup_log_root()?;
    let now = Utc::now();
    write_jsonl(
        root.path(),
        "-app",
        "s1.jsonl",
        &[usage_line(&iso(now), "s1", "r1", "m1", 100, 50)],
    )?;

    let mut monitor = LiveMonitor::with_settings(settings(root.path()), None, CostMode::Display);
    monitor.refresh_at(now).await?;
    assert_eq!(monitor.retained_entries().len(), 1);

    monitor.clear_cache();
    assert!(monitor.retained_entries().is_empty());

    monitor.refresh_at(now + Duration::seconds(3)).await?;
    assert_eq!(monitor.retained_entries().len(), 1);
    Ok(())
}

#[tokio::test]
async fn no_events_means_no_active_block() -> anyhow::Result<()> {
    let root = setup_log_root()?;
    let mut monitor = LiveMonitor::with_settings(settings(root.path()), None, CostMode::Display);
    assert!(monitor.refresh().await?.is_none());
    Ok(())
}
