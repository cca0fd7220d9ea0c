//! Vicifons harvester CLI
//!
//! Local entry point for the acquisition and correction passes.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use harvester::{
    error::{AppError, Result},
    models::{Catalog, Config},
    pipeline::{self, AcquireOptions, CorrectOptions, ShutdownSignal},
    storage::{CorpusStorage, LocalStorage, RunLock},
};

/// Vicifons harvester - Latin corpus acquisition and repair
#[derive(Parser, Debug)]
#[command(
    name = "harvester",
    version,
    about = "Harvests and repairs a Latin corpus from Vicifons"
)]
struct Cli {
    /// Corpus directory (records, state, logs, cache)
    #[arg(short, long, default_value = "corpus", global = true)]
    output: PathBuf,

    /// Config file (default: {output}/harvest.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Maximum concurrent requests
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Cache time-to-live in seconds
    #[arg(long, global = true)]
    cache_ttl: Option<u64>,

    /// Disable the payload cache
    #[arg(long, global = true)]
    no_cache: bool,

    /// Work catalog (default: from config, relative to the output directory)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Acquire every catalog work not finished by an earlier run
    Acquire {
        /// Also retry works an earlier run marked failed
        #[arg(long)]
        retry_failed: bool,
    },

    /// Reclassify stored records and repair index-only ones
    Correct {
        /// Also retry records whose last repair was aborted
        #[arg(long)]
        retry_aborted: bool,
    },

    /// Validate configuration and catalog
    Validate,

    /// Show corpus state
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool, level: &str) {
    let level = if verbose { "debug" } else { level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Apply command-line overrides on top of the file config.
fn apply_overrides(cli: &Cli, config: &mut Config) {
    if let Some(concurrency) = cli.concurrency {
        config.crawler.max_concurrent = concurrency;
    }
    if let Some(ttl) = cli.cache_ttl {
        config.cache.ttl_secs = ttl;
    }
    if cli.no_cache {
        config.cache.enabled = false;
    }
    if let Some(catalog) = &cli.catalog {
        config.paths.catalog = catalog.clone();
    }
}

/// Trigger `shutdown` on the first Ctrl-C.
fn install_ctrl_c(shutdown: ShutdownSignal) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, finishing in-flight requests...");
            shutdown.trigger();
        }
    });
}

fn load_catalog(cli: &Cli, config: &Config) -> Result<Catalog> {
    let path = cli.output.join(&config.paths.catalog);
    let catalog = Catalog::load(&path)
        .map_err(|e| AppError::config(format!("Cannot load catalog {}: {}", path.display(), e)))?;
    catalog.validate()?;
    log::info!("Loaded {} works from {}", catalog.len(), path.display());
    Ok(catalog)
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.output.join("harvest.toml"));
    let mut config = if config_path.exists() {
        Config::load(&config_path)?
    } else {
        Config::default()
    };
    init_logging(cli.verbose, &config.logging.level);
    apply_overrides(&cli, &mut config);
    config.validate()?;

    log::info!("Vicifons harvester starting (corpus: {})", cli.output.display());
    let storage = LocalStorage::new(&cli.output);

    match cli.command {
        Command::Acquire { retry_failed } => {
            let catalog = load_catalog(&cli, &config)?;
            let lock = RunLock::acquire(&cli.output)?;

            let shutdown = ShutdownSignal::new();
            install_ctrl_c(shutdown.clone());
            let scheduler =
                pipeline::build_scheduler(&config, &cli.output, &catalog, shutdown).await?;

            let summary = pipeline::run_acquisition(
                Arc::new(scheduler),
                &storage,
                &catalog,
                AcquireOptions { retry_failed },
                &lock,
            )
            .await?;
            summary.log_report("Acquisition");
        }

        Command::Correct { retry_aborted } => {
            // The catalog only feeds the multi-chapter cross-reference here.
            let catalog = load_catalog(&cli, &config).unwrap_or_else(|e| {
                log::warn!("{}; correcting without catalog hints", e);
                Catalog::default()
            });
            let lock = RunLock::acquire(&cli.output)?;

            let shutdown = ShutdownSignal::new();
            install_ctrl_c(shutdown.clone());
            let scheduler =
                pipeline::build_scheduler(&config, &cli.output, &catalog, shutdown).await?;

            let summary = pipeline::run_correction(
                &scheduler,
                &storage,
                CorrectOptions { retry_aborted },
                &lock,
            )
            .await?;
            summary.log_report("Correction");
        }

        Command::Validate => {
            log::info!("Validating configuration...");
            log::info!("✓ Config OK ({})", config_path.display());

            let catalog = load_catalog(&cli, &config)?;
            log::info!(
                "✓ Catalog OK ({} works, {} multi-chapter)",
                catalog.len(),
                catalog.multipart_ids().count()
            );

            log::info!("All validations passed!");
        }

        Command::Info => {
            log::info!("Corpus directory: {}", cli.output.display());
            log::info!(
                "Run lock: {}",
                if RunLock::is_held(&cli.output) {
                    "held"
                } else {
                    "free"
                }
            );

            let state = storage.load_resume_state().await?;
            match state.updated_at {
                Some(updated) => log::info!("Resume state last updated: {}", updated),
                None => log::info!("No resume state yet."),
            }
            for (status, count) in state.counts() {
                log::info!("  {:<18} {}", status, count);
            }

            let log_entries = storage.load_correction_log().await?;
            log::info!("Correction log: {} entries", log_entries.len());
        }
    }

    log::info!("Done!");

    Ok(())
}
