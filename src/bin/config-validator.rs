//! # Orchestrator Configuration Validator
//!
//! Command-line tool for validating update orchestrator configuration before
//! starting the scheduler. Loads the same layers the library does (file,
//! environment overrides), validates them and prints the effective settings.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use update_orchestrator::config::{ConfigManager, OrchestratorConfig};
use update_orchestrator::orchestration::BlackoutWindow;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate update orchestrator configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate (development, test, production)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory (default: config)
    #[arg(short, long, conflicts_with = "file")]
    config_dir: Option<PathBuf>,

    /// Explicit configuration file; overrides directory discovery
    #[arg(short, long)]
    file: Option<PathBuf>,

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

    /// Validate one section (scheduler, blackout, upstreams, data-kinds, tasks)
    Component { name: String },

    /// Print the effective configuration as JSON
    Show,
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

    let result = load(&cli).and_then(|manager| match &cli.command {
        Some(Commands::All) | None => validate_all(manager.config()),
        Some(Commands::Component { name }) => validate_component(manager.config(), name),
        Some(Commands::Show) => show(&manager),
    });

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {:#}", e);
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> Result<Arc<ConfigManager>> {
    let manager = match &cli.file {
        Some(path) => ConfigManager::load_from_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => {
            let dir = cli.config_dir.clone().unwrap_or_else(|| PathBuf::from("config"));
            ConfigManager::load_from_directory_with_env(Some(dir.clone()), &cli.environment)
                .with_context(|| format!("loading configuration from {}", dir.display()))?
        }
    };
    println!("✅ Configuration loaded (environment: {})", manager.environment());
    Ok(manager)
}

fn validate_all(config: &OrchestratorConfig) -> Result<()> {
    println!("🔧 Validating Update Orchestrator Configuration\n");
    validate_scheduler(config)?;
    validate_blackout(config)?;
    validate_upstreams(config)?;
    validate_data_kinds(config)?;
    validate_tasks(config)?;
    println!("\n🎉 All configuration validation checks passed!");
    Ok(())
}

fn validate_component(config: &OrchestratorConfig, name: &str) -> Result<()> {
    match name.to_lowercase().as_str() {
        "scheduler" => validate_scheduler(config)?,
        "blackout" => validate_blackout(config)?,
        "upstreams" => validate_upstreams(config)?,
        "data_kinds" | "data-kinds" => validate_data_kinds(config)?,
        "tasks" => validate_tasks(config)?,
        _ => bail!("Unknown component: {name}"),
    }
    println!("✅ Component '{name}' validation passed!");
    Ok(())
}

fn show(manager: &ConfigManager) -> Result<()> {
    let json = serde_json::to_string_pretty(&manager.debug_config())?;
    println!("{json}");
    Ok(())
}

fn validate_scheduler(config: &OrchestratorConfig) -> Result<()> {
    println!("⏱️  Scheduler");
    let scheduler = &config.scheduler;
    println!("   ✅ Tick interval: {}s", scheduler.tick_interval_seconds);
    println!("   ✅ Max queue items: {}", scheduler.max_queue_items);
    println!("   ✅ Worker concurrency: {}", scheduler.worker_concurrency);
    println!("   ✅ Interrupt on overrun: {}", scheduler.interrupt_on_overrun);
    Ok(())
}

fn validate_blackout(config: &OrchestratorConfig) -> Result<()> {
    println!("🌙 Blackout Window");
    let window = BlackoutWindow::from_config(&config.blackout)?;
    if !window.is_enabled() {
        println!("   ℹ️  Disabled, all data kinds may run at any time");
        return Ok(());
    }
    println!("   ✅ UTC offset: {} minutes", config.blackout.utc_offset_minutes);
    for session in &config.blackout.sessions {
        println!("   ✅ Session {} - {}", session.start, session.end);
    }
    println!("   ✅ Operational days: {}", config.blackout.operational_days.join(", "));
    Ok(())
}

fn validate_upstreams(config: &OrchestratorConfig) -> Result<()> {
    println!("🌐 Upstreams");
    let mut names: Vec<&String> = config.upstreams.keys().collect();
    names.sort();
    for name in names {
        let upstream = config.upstream(name);
        println!(
            "   ✅ {name}: {} rpm (burst {}), breaker after {} failures, recovery {}s (max {}s), timeout {}s",
            upstream.requests_per_minute,
            upstream.capacity(),
            upstream.failure_threshold,
            upstream.recovery_timeout().as_secs(),
            upstream.max_recovery_timeout().as_secs(),
            upstream.call_timeout().as_secs(),
        );
    }
    Ok(())
}

fn validate_data_kinds(config: &OrchestratorConfig) -> Result<()> {
    println!("📊 Data Kinds");
    let mut kinds: Vec<_> = config.data_kinds.iter().collect();
    kinds.sort_by_key(|(kind, kind_config)| (kind_config.priority, **kind));
    for (kind, kind_config) in kinds {
        let mut flags = Vec::new();
        if kind_config.bulk {
            flags.push("bulk");
        }
        if kind_config.skip_during_active_hours {
            flags.push("deferred during active hours");
        }
        println!(
            "   ✅ {kind}: every {}s, priority {}{}",
            kind_config.update_interval_seconds,
            kind_config.priority,
            if flags.is_empty() {
                String::new()
            } else {
                format!(" ({})", flags.join(", "))
            }
        );
    }
    Ok(())
}

fn validate_tasks(config: &OrchestratorConfig) -> Result<()> {
    println!("📋 Tasks");
    for task in &config.tasks {
        if config.data_kind(task.data_kind).is_none() {
            bail!(
                "task '{}' refers to data kind '{}' which has no data_kinds entry",
                task.name,
                task.data_kind
            );
        }
        let marker = if task.enabled { "✅" } else { "⏸️ " };
        println!(
            "   {marker} {} -> {} via {} (batch {}, max runtime {}s)",
            task.name, task.data_kind, task.upstream, task.batch_size, task.max_runtime_seconds
        );
    }
    Ok(())
}
