//! # Chronotree CLI - Rebuild historical source trees
//!
//! Command-line front end for the chronotree library.
//!
//! ## Features
//! - Inspect the release catalog and dependency chains
//! - Materialize a version from its snapshot and diffs
//! - Apply the rewrite rules to any tree
//! - Sync a patched tree into a working directory with minimal churn
//!
//! ## Usage
//! ```bash
//! # What can be rebuilt?
//! chronotree versions
//!
//! # Which artifacts make up 0.68?
//! chronotree deps 0.68
//!
//! # Rebuild 0.68 into ./ruby, showing what would change first
//! chronotree --archive-dir ~/archives reconstruct 0.68 ./ruby --dry-run
//! chronotree --archive-dir ~/archives reconstruct 0.68 ./ruby
//! ```

use anyhow::{Context, Result};
use chronotree::utils::{format_bytes, hash_tree};
use chronotree::{
    ChronoError, PatchPipeline, PatchReport, ReconstructConfig, Reconstructor, SyncAction,
    SyncReport, VersionResolver,
};
use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Chronotree CLI - Rebuild historical source trees from snapshots and diffs
#[derive(Parser)]
#[command(name = "chronotree")]
#[command(version)]
#[command(about = "Rebuild historical source trees from release snapshots and diffs")]
#[command(long_about = None)]
struct Cli {
    /// Directory holding snapshot and diff files
    #[arg(short, long, global = true)]
    archive_dir: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Show a spinner during long operations
    #[arg(long, global = true)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List catalog versions
    #[command(alias = "ls")]
    Versions,

    /// Show the artifacts needed for a version
    Deps {
        /// Version identifier
        version: String,
    },

    /// Materialize a version without patching
    Extract {
        /// Version identifier
        version: String,

        /// Destination directory (replaced)
        dest: PathBuf,
    },

    /// Apply the rewrite rules to a tree in place
    Patch {
        /// Tree to rewrite
        dir: PathBuf,
    },

    /// List rewrite rules in execution order
    Rules,

    /// Patch a copy of a tree and sync it into a destination
    Sync {
        /// Unpatched source tree (left untouched)
        src: PathBuf,

        /// Persistent destination
        dest: PathBuf,

        /// Only print the planned actions
        #[arg(long)]
        dry_run: bool,
    },

    /// Materialize, patch, and sync a version
    #[command(alias = "rc")]
    Reconstruct {
        /// Version identifier
        version: String,

        /// Persistent destination
        dest: PathBuf,

        /// Only print the planned actions
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the content digest of a tree, build artifacts excluded
    Digest {
        /// Tree to hash
        dir: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    // Run command
    if let Err(e) = run(cli) {
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        if let Some(err) = e.downcast_ref::<ChronoError>() {
            let hint = err.user_message();
            if hint != err.to_string() {
                eprintln!("  {}", hint.dimmed());
            }
        }
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => ReconstructConfig::load(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => ReconstructConfig::default(),
    };
    if let Some(dir) = cli.archive_dir {
        config.archive_dir = Some(dir);
    }
    let progress = cli.progress;

    match cli.command {
        Commands::Versions => cmd_versions(&config),
        Commands::Deps { version } => cmd_deps(&config, &version),
        Commands::Extract { version, dest } => cmd_extract(&config, &version, dest, progress),
        Commands::Patch { dir } => cmd_patch(&config, dir),
        Commands::Rules => cmd_rules(&config),
        Commands::Sync { src, dest, dry_run } => cmd_sync(&config, src, dest, dry_run, progress),
        Commands::Reconstruct {
            version,
            dest,
            dry_run,
        } => cmd_reconstruct(&config, &version, dest, dry_run, progress),
        Commands::Digest { dir } => cmd_digest(&config, dir),
    }
}

fn spinner(enabled: bool, message: &str) -> Result<Option<ProgressBar>> {
    if !enabled {
        return Ok(None);
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(Some(pb))
}

/// List versions with how each one is obtained
fn cmd_versions(config: &ReconstructConfig) -> Result<()> {
    let catalog = config.load_catalog()?;
    for version in catalog.versions() {
        if catalog.is_direct(version) {
            println!("{:<14} {}", version.bold(), "snapshot".green());
        } else if let Some(step) = catalog.diff_step(version) {
            println!(
                "{:<14} {} {}",
                version.bold(),
                "diff from".yellow(),
                step.previous
            );
        }
    }
    Ok(())
}

fn cmd_deps(config: &ReconstructConfig, version: &str) -> Result<()> {
    let catalog = config.load_catalog()?;
    let chain = VersionResolver::new(&catalog).chain(version)?;
    for artifact in &chain.artifacts {
        println!("{}  {}", artifact.name, format!("-> {}", artifact.version).dimmed());
    }
    Ok(())
}

fn cmd_extract(
    config: &ReconstructConfig,
    version: &str,
    dest: PathBuf,
    progress: bool,
) -> Result<()> {
    let reconstructor = Reconstructor::from_config(config)?;
    let start = Instant::now();
    let pb = spinner(progress, &format!("Materializing {}...", version))?;

    let chain = reconstructor.materialize(version, &dest)?;

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    println!(
        "{} Materialized {} into {} from {} artifact(s) in {}",
        "✓".green().bold(),
        version.yellow().bold(),
        dest.display(),
        chain.artifacts.len(),
        format_duration(round_millis(start.elapsed()))
    );
    Ok(())
}

fn cmd_patch(config: &ReconstructConfig, dir: PathBuf) -> Result<()> {
    let pipeline = config.pipeline()?;
    let report = pipeline.apply(&dir)?;
    print_patch_report(&report);
    Ok(())
}

fn cmd_rules(config: &ReconstructConfig) -> Result<()> {
    for (index, rule) in PatchPipeline::standard().rules().iter().enumerate() {
        if config.disabled_rules.iter().any(|name| name == rule.name) {
            println!("{:>2}. {} {}", index + 1, rule.name.dimmed(), "(disabled)".red());
        } else {
            println!("{:>2}. {}", index + 1, rule.name);
        }
    }
    Ok(())
}

fn cmd_sync(
    config: &ReconstructConfig,
    src: PathBuf,
    dest: PathBuf,
    dry_run: bool,
    progress: bool,
) -> Result<()> {
    let reconstructor = Reconstructor::from_config(config)?;
    let pb = spinner(progress, "Patching and syncing...")?;

    let (patch, actions, duration) = if dry_run {
        let (patch, plan) = reconstructor.plan_patched(&src, &dest)?;
        (patch, plan.actions, None)
    } else {
        let (patch, sync) = reconstructor.sync_patched(&src, &dest)?;
        (patch, sync.actions, Some(sync.duration))
    };

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    print_patch_report(&patch);
    let sync = SyncReport {
        actions,
        duration: duration.unwrap_or_default(),
    };
    print_sync(&sync, dry_run);
    Ok(())
}

fn cmd_reconstruct(
    config: &ReconstructConfig,
    version: &str,
    dest: PathBuf,
    dry_run: bool,
    progress: bool,
) -> Result<()> {
    let reconstructor = Reconstructor::from_config(config)?;
    let pb = spinner(progress, &format!("Reconstructing {}...", version))?;

    let report = reconstructor
        .reconstruct(version, &dest, dry_run)
        .with_context(|| format!("reconstruction of {} failed", version))?;

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    println!(
        "{} {} from {}",
        "Reconstructed".blue().bold(),
        version.yellow().bold(),
        report.chain.names().join(" + ")
    );
    print_patch_report(&report.patch);
    print_sync(&report.sync, dry_run);
    Ok(())
}

fn cmd_digest(config: &ReconstructConfig, dir: PathBuf) -> Result<()> {
    let artifacts = config.load_build_artifacts()?;
    let digest = hash_tree(&dir, &artifacts)?;
    println!("{}", digest.digest);
    println!(
        "  {} files, {}",
        digest.files,
        format_bytes(digest.total_bytes)
    );
    Ok(())
}

fn print_patch_report(report: &PatchReport) {
    for outcome in &report.outcomes {
        for path in &outcome.changed {
            println!(
                "  {} {} {}",
                "patched".cyan(),
                path.display(),
                format!("({})", outcome.rule).dimmed()
            );
        }
    }
}

fn print_sync(report: &SyncReport, dry_run: bool) {
    for action in &report.actions {
        let line = action.to_string();
        let colored = match action {
            SyncAction::Create { .. } => line.green(),
            SyncAction::Update { .. } => line.yellow(),
            SyncAction::Delete { .. } => line.red(),
        };
        println!("  {}", colored);
    }

    if report.actions.is_empty() {
        println!("{} Destination already up to date", "✓".green().bold());
    } else if dry_run {
        println!(
            "{} {} action(s) planned, nothing changed",
            "•".blue().bold(),
            report.actions.len()
        );
    } else {
        println!(
            "{} {} in {}",
            "✓".green().bold(),
            report.summary(),
            format_duration(round_millis(report.duration))
        );
    }
}

fn round_millis(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}
