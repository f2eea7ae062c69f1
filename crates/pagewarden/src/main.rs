//! Pagewarden launcher: scan orchestration for hierarchical content
//! sources, one subcommand per operator action.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pagewarden_db::WardenDb;
use pagewarden_detector::{Detector, HttpDetector};
use pagewarden_engine::{EngineSettings, ScanEngine, ScanReporter};
use pagewarden_logging::{init_logging, pagewarden_home};
use pagewarden_protocol::{defaults, PartitionKey, ScanId, WardenConfig};
use pagewarden_security::{FindingsCipher, Revealer};
use pagewarden_source::{ContentSource, HttpContentSource};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

mod output;
mod demo;

#[derive(Parser, Debug)]
#[command(name = "pagewarden", about = "Sensitive-data scanning for wiki-style content trees")]
struct Cli {
    /// Enable verbose logging on stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// SQLite database path (default: ~/.pagewarden/pagewarden.sqlite3)
    #[arg(long, env = "PAGEWARDEN_DB", global = true)]
    db: Option<PathBuf>,

    /// Passphrase for findings-at-rest encryption
    #[arg(long, env = "PAGEWARDEN_KEY", global = true, hide_env_values = true)]
    key: Option<String>,

    /// Content source base URL
    #[arg(long, env = "PAGEWARDEN_SOURCE_URL", global = true)]
    source_url: Option<String>,

    /// Content source bearer token
    #[arg(long, env = "PAGEWARDEN_SOURCE_TOKEN", global = true, hide_env_values = true)]
    source_token: Option<String>,

    /// Detector service base URL
    #[arg(long, env = "PAGEWARDEN_DETECTOR_URL", global = true)]
    detector_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan one partition, or every partition with --all
    Scan {
        /// Partition key to scan
        #[arg(long, conflicts_with = "all")]
        partition: Option<String>,

        /// Scan every partition of the source
        #[arg(long)]
        all: bool,

        /// Only units and attachments modified at or after this RFC 3339
        /// instant
        #[arg(long)]
        since: Option<String>,

        /// Reuse an existing scan id instead of generating one
        #[arg(long)]
        scan_id: Option<String>,
    },

    /// Request a cooperative pause of one partition's scan
    Pause { scan_id: String, partition: String },

    /// Continue a paused partition after its last finished unit
    Resume { scan_id: String, partition: String },

    /// Checkpoint status and progress per partition
    Status {
        /// Scan id (default: the most recent scan)
        #[arg(long)]
        scan_id: Option<String>,

        /// Latest result per partition across all scans
        #[arg(long, conflicts_with = "scan_id")]
        global: bool,
    },

    /// Full report: status, counts, and severity totals per partition
    Report {
        #[arg(long)]
        scan_id: Option<String>,
    },

    /// Tail the event log of a running scan, exiting when it finishes
    Watch {
        #[arg(long)]
        scan_id: Option<String>,

        /// Restrict to one partition
        #[arg(long)]
        partition: Option<String>,
    },

    /// Decrypt the findings of one logged event (writes an audit row)
    Reveal {
        scan_id: String,
        seq: i64,

        /// Recorded in the audit trail
        #[arg(long, default_value = "operator-review")]
        purpose: String,
    },

    /// Delete scan data or expired audit rows
    Purge {
        /// Delete checkpoints, events, and counters of one scan
        #[arg(long)]
        scan_id: Option<String>,

        /// Delete audit rows older than this many days
        #[arg(long)]
        audit_older_than_days: Option<i64>,
    },

    /// Run a self-contained scan against built-in sample content
    Demo,
}

fn build_config(cli: &Cli) -> WardenConfig {
    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| pagewarden_home().join(defaults::DEFAULT_DB_FILE));
    let mut config = WardenConfig::new(db_path, cli.key.clone().unwrap_or_default());
    config.source_url = cli.source_url.clone();
    config.source_token = cli.source_token.clone();
    config.detector_url = cli.detector_url.clone();
    config
}

fn require_key(config: &WardenConfig) -> Result<FindingsCipher> {
    if config.encryption_key.is_empty() {
        bail!("An encryption key is required: pass --key or set PAGEWARDEN_KEY");
    }
    Ok(FindingsCipher::from_passphrase(&config.encryption_key))
}

fn build_source(config: &WardenConfig) -> Result<Arc<dyn ContentSource>> {
    let url = config
        .source_url
        .as_deref()
        .context("A content source is required: pass --source-url or set PAGEWARDEN_SOURCE_URL")?;
    Ok(Arc::new(HttpContentSource::new(
        url,
        config.source_token.clone(),
    )))
}

fn build_detector(config: &WardenConfig) -> Result<Arc<dyn Detector>> {
    let url = config
        .detector_url
        .as_deref()
        .context("A detector is required: pass --detector-url or set PAGEWARDEN_DETECTOR_URL")?;
    Ok(Arc::new(HttpDetector::new(url)))
}

fn parse_since(since: Option<&str>) -> Result<Option<i64>> {
    since
        .map(|raw| {
            chrono::DateTime::parse_from_rfc3339(raw)
                .map(|instant| instant.timestamp_millis())
                .with_context(|| format!("Invalid --since value '{raw}', expected RFC 3339"))
        })
        .transpose()
}

async fn resolve_scan_id(db: &WardenDb, scan_id: Option<String>) -> Result<ScanId> {
    match scan_id {
        Some(id) => Ok(ScanId(id)),
        None => {
            let latest = db
                .latest_scan()
                .await?
                .context("No scans recorded yet; run `pagewarden scan` first")?;
            Ok(latest.scan_id)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging("pagewarden", cli.verbose)?;
    let config = build_config(&cli);

    match cli.command {
        Commands::Scan {
            partition,
            all,
            since,
            scan_id,
        } => cmd_scan(&config, partition, all, since, scan_id).await,
        Commands::Pause { scan_id, partition } => cmd_pause(&config, scan_id, partition).await,
        Commands::Resume { scan_id, partition } => cmd_resume(&config, scan_id, partition).await,
        Commands::Status { scan_id, global } => cmd_status(&config, scan_id, global).await,
        Commands::Report { scan_id } => cmd_report(&config, scan_id).await,
        Commands::Watch { scan_id, partition } => cmd_watch(&config, scan_id, partition).await,
        Commands::Reveal {
            scan_id,
            seq,
            purpose,
        } => cmd_reveal(&config, scan_id, seq, purpose).await,
        Commands::Purge {
            scan_id,
            audit_older_than_days,
        } => cmd_purge(&config, scan_id, audit_older_than_days).await,
        Commands::Demo => demo::run(&config).await,
    }
}

async fn cmd_scan(
    config: &WardenConfig,
    partition: Option<String>,
    all: bool,
    since: Option<String>,
    scan_id: Option<String>,
) -> Result<()> {
    let cipher = require_key(config)?;
    let db = WardenDb::open(&config.db_path).await?;
    let source = build_source(config)?;
    let detector = build_detector(config)?;
    let (engine, handle) = ScanEngine::new(
        db.clone(),
        source,
        detector,
        cipher,
        EngineSettings::from(config),
    );

    let keepalive = engine
        .hub()
        .spawn_keepalive(Duration::from_secs(config.keepalive_secs));
    let scan_id = scan_id.map(ScanId).unwrap_or_else(ScanId::generate);
    let since_ms = parse_since(since.as_deref())?;
    println!("Scan {scan_id}");

    if all {
        let results = engine.scan_all(&scan_id, since_ms).await?;
        println!("{}", output::scan_results_table(&results));
    } else {
        let Some(key) = partition else {
            bail!("Pass --partition <KEY> or --all");
        };
        let key: PartitionKey = key.as_str().into();
        let status = engine.scan_partition(&scan_id, &key, since_ms).await?;
        println!("Partition {key}: {status}");
    }

    keepalive.abort();
    drop(engine);
    handle.join().await;
    Ok(())
}

async fn cmd_pause(config: &WardenConfig, scan_id: String, partition: String) -> Result<()> {
    let db = WardenDb::open(&config.db_path).await?;
    let scan_id = ScanId(scan_id);
    let key: PartitionKey = partition.as_str().into();
    if pagewarden_engine::request_pause(&db, &scan_id, &key).await? {
        println!("Pause requested for partition {key} of scan {scan_id}");
    } else {
        println!("Nothing to pause: partition {key} has no active scan");
    }
    Ok(())
}

async fn cmd_resume(config: &WardenConfig, scan_id: String, partition: String) -> Result<()> {
    let cipher = require_key(config)?;
    let db = WardenDb::open(&config.db_path).await?;
    let source = build_source(config)?;
    let detector = build_detector(config)?;
    let (engine, handle) = ScanEngine::new(
        db,
        source,
        detector,
        cipher,
        EngineSettings::from(config),
    );
    let scan_id = ScanId(scan_id);
    let key: PartitionKey = partition.as_str().into();
    let status = engine.resume(&scan_id, &key).await?;
    println!("Partition {key}: {status}");
    drop(engine);
    handle.join().await;
    Ok(())
}

async fn cmd_status(config: &WardenConfig, scan_id: Option<String>, global: bool) -> Result<()> {
    let db = WardenDb::open(&config.db_path).await?;
    let reporter = ScanReporter::new(db.clone());

    if global {
        let overview = reporter.global_overview().await?;
        println!("{}", output::global_overview_table(&overview));
        return Ok(());
    }

    let scan_id = resolve_scan_id(&db, scan_id).await?;
    let checkpoints = reporter.status(&scan_id).await?;
    if checkpoints.is_empty() {
        println!("No checkpoints recorded for scan {scan_id}");
        return Ok(());
    }
    println!("Scan {scan_id}");
    println!("{}", output::status_table(&checkpoints));
    Ok(())
}

async fn cmd_report(config: &WardenConfig, scan_id: Option<String>) -> Result<()> {
    let db = WardenDb::open(&config.db_path).await?;
    let reporter = ScanReporter::new(db.clone());
    let scan_id = resolve_scan_id(&db, scan_id).await?;
    let rows = reporter.report(&scan_id).await?;
    if rows.is_empty() {
        println!("No data recorded for scan {scan_id}");
        return Ok(());
    }
    println!("Scan {scan_id}");
    println!("{}", output::report_table(&rows));
    Ok(())
}

/// Poll interval for `watch`.
const WATCH_POLL_MS: u64 = 1_000;

async fn cmd_watch(
    config: &WardenConfig,
    scan_id: Option<String>,
    partition: Option<String>,
) -> Result<()> {
    let db = WardenDb::open(&config.db_path).await?;
    let scan_id = resolve_scan_id(&db, scan_id).await?;
    let key = partition.map(|p| PartitionKey(p));
    info!(%scan_id, "Watching event log");

    let mut last_seq = 0i64;
    let mut partitions_seen: HashSet<String> = HashSet::new();
    let mut partitions_done: HashSet<String> = HashSet::new();
    let mut saw_rollup = false;
    loop {
        let events = db.events_by_scan(&scan_id, key.as_ref()).await?;
        for event in events.iter() {
            if event.seq <= last_seq {
                continue;
            }
            last_seq = event.seq;
            println!("{}", output::event_line(event));
            partitions_seen.insert(event.partition_key.as_str().to_string());
            let terminal_here = match event.kind {
                pagewarden_protocol::ScanEventKind::Complete => true,
                pagewarden_protocol::ScanEventKind::MultiComplete => {
                    saw_rollup = true;
                    false
                }
                pagewarden_protocol::ScanEventKind::Error => event.unit_id.is_none(),
                _ => false,
            };
            if terminal_here {
                partitions_done.insert(event.partition_key.as_str().to_string());
            }
        }
        if watch_finished(saw_rollup, &partitions_seen, &partitions_done) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(WATCH_POLL_MS)).await;
    }
}

/// The scan-level roll-up always ends the watch. A log that names only one
/// partition never gets a roll-up, so that partition's own terminal row ends
/// the watch instead. Multi-partition logs wait for the roll-up: a sibling
/// partition may not have logged yet.
fn watch_finished(
    saw_rollup: bool,
    partitions_seen: &HashSet<String>,
    partitions_done: &HashSet<String>,
) -> bool {
    saw_rollup || (partitions_seen.len() == 1 && partitions_done == partitions_seen)
}

async fn cmd_reveal(
    config: &WardenConfig,
    scan_id: String,
    seq: i64,
    purpose: String,
) -> Result<()> {
    let cipher = require_key(config)?;
    let db = WardenDb::open(&config.db_path).await?;
    let scan_id = ScanId(scan_id);
    let event = db
        .get_event(&scan_id, seq)
        .await?
        .with_context(|| format!("No event {seq} in scan {scan_id}"))?;

    let revealer = Revealer::new(db, cipher);
    let payload = revealer.reveal(&event, &purpose).await?;
    if payload.findings.is_empty() {
        println!("Event {seq} carries no findings");
        return Ok(());
    }
    if let Some(snippet) = &payload.snippet {
        println!("Context: {snippet}");
    }
    println!("{}", output::findings_table(&payload.findings, true));
    Ok(())
}

async fn cmd_purge(
    config: &WardenConfig,
    scan_id: Option<String>,
    audit_older_than_days: Option<i64>,
) -> Result<()> {
    if scan_id.is_none() && audit_older_than_days.is_none() {
        bail!("Pass --scan-id and/or --audit-older-than-days");
    }
    let db = WardenDb::open(&config.db_path).await?;
    let reporter = ScanReporter::new(db);
    if let Some(id) = scan_id {
        let removed = reporter.purge_scan(&ScanId(id)).await?;
        println!("Removed {removed} rows");
    }
    if audit_older_than_days.is_some() {
        let removed = reporter.purge_audit(audit_older_than_days).await?;
        println!("Removed {removed} audit rows");
    }
    Ok(())
}
