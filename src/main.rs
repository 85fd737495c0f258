use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::process;

use claude_scope::aggregate::{self, BatchOptions, ReportKind};
use claude_scope::blocks::{self, burn_rate, project_usage};
use claude_scope::config::get_config;
use claude_scope::dedup::DedupIndex;
use claude_scope::discovery::{discover_roots, find_log_files};
use claude_scope::live::LiveMonitor;
use claude_scope::logging::init_logging;
use claude_scope::pricing::{CostMode, PricingCache};
use claude_scope::status_cache::StatusCache;

#[derive(Parser)]
#[command(name = "claude-scope")]
#[command(about = "Usage-event ingestion, deduplication and billing-window engine for Claude Code logs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Always compute costs from tokens, ignoring recorded costs
    #[arg(long, global = true)]
    calculate: bool,

    /// Only use recorded costs, never compute from tokens
    #[arg(long, global = true, conflicts_with = "calculate")]
    display: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Daily usage totals
    Daily {
        #[command(flatten)]
        args: ReportArgs,
        /// Break days down by project
        #[arg(long)]
        by_project: bool,
    },
    /// ISO-week usage totals
    Weekly(ReportArgs),
    /// Monthly usage totals
    Monthly(ReportArgs),
    /// Per-session usage totals
    Session(ReportArgs),
    /// Billing-window blocks over the full corpus
    Blocks {
        /// Only print the currently active block
        #[arg(long)]
        active: bool,
    },
    /// Continuous monitoring of the active billing window
    Live {
        /// One refresh tick, then exit
        #[arg(long)]
        snapshot: bool,
    },
    /// Cross-process cached status for one session
    Status {
        #[arg(long)]
        session_id: String,
    },
}

#[derive(clap::Args)]
struct ReportArgs {
    /// Start date filter (YYYY-MM-DD)
    #[arg(long)]
    since: Option<String>,
    /// End date filter (YYYY-MM-DD)
    #[arg(long)]
    until: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let cost_mode = if cli.calculate {
        CostMode::Calculate
    } else if cli.display {
        CostMode::Display
    } else {
        CostMode::Auto
    };

    let result = match cli.command {
        Commands::Daily { args, by_project } => {
            let kind = if by_project {
                ReportKind::DailyByProject
            } else {
                ReportKind::Daily
            };
            run_report(kind, args, cost_mode).await
        }
        Commands::Weekly(args) => run_report(ReportKind::Weekly, args, cost_mode).await,
        Commands::Monthly(args) => run_report(ReportKind::Monthly, args, cost_mode).await,
        Commands::Session(args) => run_report(ReportKind::Session, args, cost_mode).await,
        Commands::Blocks { active } => run_blocks(active, cost_mode).await,
        Commands::Live { snapshot } => run_live(snapshot, cost_mode).await,
        Commands::Status { session_id } => run_status(&session_id, cost_mode).await,
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) => handle_error(e),
    }
}

fn parse_date(value: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| anyhow::anyhow!("Invalid date: {}. Use YYYY-MM-DD", value))?;
    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc())
        .ok_or_else(|| anyhow::anyhow!("Invalid date: {}", value))
}

async fn load_pricing(cost_mode: CostMode) -> PricingCache {
    if !cost_mode.needs_pricing() || get_config().live.offline {
        return PricingCache::offline();
    }
    #[cfg(feature = "pricing")]
    {
        PricingCache::fetch().await
    }
    #[cfg(not(feature = "pricing"))]
    {
        PricingCache::offline()
    }
}

async fn run_report(kind: ReportKind, args: ReportArgs, cost_mode: CostMode) -> Result<()> {
    let since = args.since.as_deref().map(|s| parse_date(s, false)).transpose()?;
    let until = args.until.as_deref().map(|s| parse_date(s, true)).transpose()?;

    let roots = discover_roots()?;
    let files = find_log_files(&roots);
    let pricing = load_pricing(cost_mode).await;

    let options = BatchOptions {
        kind,
        since,
        until,
        cost_mode,
    };
    let buckets = aggregate::run_batch(files, &options, &pricing)?;
    println!("{}", serde_json::to_string_pretty(&buckets)?);
    Ok(())
}

async fn run_blocks(active_only: bool, cost_mode: CostMode) -> Result<()> {
    let roots = discover_roots()?;
    let files = find_log_files(&roots);
    let pricing = load_pricing(cost_mode).await;

    let dedup = DedupIndex::new();
    let mut events = aggregate::collect_events(files, &dedup, None, None)?;
    events.sort_by_key(|e| e.timestamp);

    let now = Utc::now();
    let all = blocks::segment_into_blocks(&events, blocks::block_duration(), now, &pricing, cost_mode);
    let selected: Vec<_> = if active_only {
        all.into_iter().filter(|b| b.is_active).collect()
    } else {
        all
    };
    println!("{}", serde_json::to_string_pretty(&selected)?);
    Ok(())
}

async fn run_live(snapshot: bool, cost_mode: CostMode) -> Result<()> {
    let mut monitor = LiveMonitor::new(cost_mode).await;
    if snapshot {
        let block = monitor.refresh().await?;
        println!("{}", serde_json::to_string_pretty(&block)?);
        return Ok(());
    }
    monitor.run().await
}

/// One-shot, high-frequency status path: many independent invocations share
/// one cached result through the cross-process cache.
async fn run_status(session_id: &str, cost_mode: CostMode) -> Result<()> {
    let roots = discover_roots()?;
    let files = find_log_files(&roots);
    let pricing = load_pricing(cost_mode).await;

    // The session's own log file drives cache invalidation.
    let session_file = files.iter().find(|(path, _)| {
        path.file_stem().and_then(|s| s.to_str()) == Some(session_id)
    });
    let source_mtime_ms = session_file
        .and_then(|(path, _)| std::fs::metadata(path).ok())
        .and_then(|m| m.modified().ok())
        .map(|t| DateTime::<Utc>::from(t).timestamp_millis())
        .unwrap_or(0);

    let cache = StatusCache::from_config();
    let output = cache.resolve_status_output(session_id, source_mtime_ms, || {
        compute_status(files, &pricing, cost_mode)
    });
    println!("{}", output);
    Ok(())
}

fn compute_status(
    files: Vec<(std::path::PathBuf, String)>,
    pricing: &PricingCache,
    cost_mode: CostMode,
) -> Result<String> {
    let dedup = DedupIndex::new();
    let mut events = aggregate::collect_events(files, &dedup, None, None)?;
    events.sort_by_key(|e| e.timestamp);

    let now = Utc::now();
    let all = blocks::segment_into_blocks(&events, blocks::block_duration(), now, pricing, cost_mode);
    let Some(active) = all.iter().find(|b| b.is_active) else {
        return Ok(serde_json::json!({ "active": false }).to_string());
    };

    let rate = burn_rate(active, now);
    let projected = project_usage(active, now);
    Ok(serde_json::json!({
        "active": true,
        "blockStart": active.start_time,
        "blockEnd": active.end_time,
        "tokens": active.token_counts.total(),
        "costUSD": active.cost,
        "burnRate": rate,
        "projected": projected,
        "usageLimitReset": active.usage_limit_reset,
    })
    .to_string())
}

fn handle_error(e: anyhow::Error) -> Result<()> {
    println!("{}", serde_json::json!({ "error": format!("{:#}", e) }));
    process::exit(1);
}
