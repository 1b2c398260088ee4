//! # Area Configuration Validator
//!
//! Command-line tool for checking configuration layers and catalogue
//! snapshots before starting the orchestration core.

use anyhow::Context;
use area_core::catalog::InMemoryCatalog;
use area_core::config::{AreaConfig, ConfigManager};
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate area orchestration configuration")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate (development, test, production, ...)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory (default: $AREA_CONFIG_DIR or ./config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate every configuration section
    All,

    /// Print the merged configuration as JSON with credentials masked
    Show,

    /// Validate a catalogue snapshot file
    Catalog {
        /// Path to a JSON catalogue snapshot
        path: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::All) | None => validate_all(&cli),
        Some(Commands::Show) => show(&cli),
        Some(Commands::Catalog { path }) => validate_catalog(path),
    };

    match result {
        Ok(()) => {
            info!("Validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Validation failed: {e:#}");
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> anyhow::Result<std::sync::Arc<ConfigManager>> {
    ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &cli.environment)
        .with_context(|| format!("failed to load configuration for '{}'", cli.environment))
}

fn validate_all(cli: &Cli) -> anyhow::Result<()> {
    println!("🔧 Validating Area Configuration");
    println!("Environment: {}", cli.environment);

    let manager = load(cli)?;
    println!(
        "Config Directory: {}",
        manager.config_directory().display()
    );
    println!("✅ Configuration loaded and validated");
    println!();

    let config = manager.config();
    report_dispatcher(config);
    report_retry(config);
    report_dedup(config);
    report_database(config);

    println!("\n🎉 All configuration validation checks passed!");
    Ok(())
}

fn show(cli: &Cli) -> anyhow::Result<()> {
    let manager = load(cli)?;
    println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
    Ok(())
}

fn validate_catalog(path: &Path) -> anyhow::Result<()> {
    println!("📚 Validating catalogue snapshot {}", path.display());

    let catalog = InMemoryCatalog::load_snapshot_file(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    let snapshot = catalog.snapshot();

    let known: HashSet<Uuid> = snapshot.instances.iter().map(|i| i.id).collect();
    let mut dangling = Vec::new();
    for link in &snapshot.links {
        for instance_id in [link.source_instance_id, link.target_instance_id] {
            if !known.contains(&instance_id) {
                dangling.push(format!("{} -> missing instance {instance_id}", link.id()));
            }
        }
    }

    println!("   ✅ {} definitions", snapshot.definitions.len());
    println!("   ✅ {} areas", snapshot.areas.len());
    println!("   ✅ {} instances", snapshot.instances.len());
    println!("   ✅ {} links", snapshot.links.len());

    if !dangling.is_empty() {
        anyhow::bail!("links reference unknown instances:\n  {}", dangling.join("\n  "));
    }
    Ok(())
}

fn report_dispatcher(config: &AreaConfig) {
    let d = &config.dispatcher;
    println!("👷 Dispatcher");
    println!("   ✅ Workers: {}", d.worker_count);
    println!("   ✅ Poll interval: {}ms", d.poll_interval_ms);
    println!("   ✅ Handler timeout: {}ms", d.handler_timeout_ms);
    println!(
        "   ✅ Stall timeout: {}s (reaper every {}s)",
        d.stalled_execution_timeout_seconds, d.reaper_interval_seconds
    );
}

fn report_retry(config: &AreaConfig) {
    let r = &config.retry;
    println!("🔁 Retry");
    println!("   ✅ Max attempts: {}", r.max_attempts);
    println!(
        "   ✅ Backoff: {}ms x{} capped at {}ms, jitter {}",
        r.base_delay_ms, r.multiplier, r.max_delay_ms, r.jitter_factor
    );
    println!("   ✅ Total budget: {}s", r.max_total_elapsed_seconds);
}

fn report_dedup(config: &AreaConfig) {
    println!("🧹 Dedup");
    println!("   ✅ Key prefix: {}", config.dedup.key_prefix);
    println!(
        "   ✅ Volatile fields: {}",
        config.dedup.volatile_fields.join(", ")
    );
}

fn report_database(config: &AreaConfig) {
    println!("🗄️  Database");
    match &config.database.url {
        Some(_) => println!("   ✅ URL configured"),
        None => println!("   ℹ️  URL not configured (in-memory store only)"),
    }
    println!(
        "   ✅ Pool: {} connections, {}s acquire timeout",
        config.database.max_connections, config.database.acquire_timeout_seconds
    );
}
