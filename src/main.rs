use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use photo_archive::{logging, CatalogRegistry, IngestConfig, Ingestor};

#[derive(Parser)]
#[command(version, about = "Content-addressed photo archive")]
struct Opts {
    /// Debug logging (RUST_LOG overrides)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy new photos from a source tree into the archive
    Ingest {
        /// Directory to scan recursively
        #[arg(long)]
        source: PathBuf,
        /// Archive root (created if missing)
        #[arg(long, env = "PHOTO_ARCHIVE_ROOT")]
        export_root: PathBuf,
        /// TOML config file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Parallel workers (0 = one per core)
        #[arg(long)]
        workers: Option<usize>,
        /// Print the run report as JSON on stdout
        #[arg(long)]
        json: bool,
    },
    /// Re-derive missing thumbnails and fill in their dimensions
    RepairThumbnails {
        #[arg(long, env = "PHOTO_ARCHIVE_ROOT")]
        export_root: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Print catalog entries, newest first
    List {
        #[arg(long, env = "PHOTO_ARCHIVE_ROOT")]
        export_root: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let opts = Opts::parse();
    logging::init(opts.verbose);

    if let Err(err) = run(opts.command).await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Ingest {
            source,
            export_root,
            config,
            workers,
            json,
        } => {
            let mut config = IngestConfig::load(config.as_deref(), &export_root)?;
            if let Some(workers) = workers {
                config.workers = workers;
            }

            let ingestor = open_ingestor(&export_root, config)?;
            cancel_on_ctrl_c(&ingestor);

            println!("🔍 Scanning folder: {}", source.display());
            let report = ingestor.run(&source).await?;
            ingestor.close();

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "✅ Ingest complete: {} new, {} skipped, {} failed",
                    report.cataloged, report.skipped, report.failed
                );
                for failure in &report.failures {
                    eprintln!("⚠️  {}: {}", failure.path.display(), failure.message);
                }
                if report.cancelled {
                    println!("⏹️  Stopped early, {} of {} files processed", report.processed(), report.discovered);
                }
            }
        }
        Command::RepairThumbnails {
            export_root,
            config,
            json,
        } => {
            let config = IngestConfig::load(config.as_deref(), &export_root)?;
            let ingestor = open_ingestor(&export_root, config)?;
            cancel_on_ctrl_c(&ingestor);

            let report = ingestor.repair_thumbnails().await?;
            ingestor.close();

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "✅ Repair complete: {} of {} entries fixed, {} failed",
                    report.repaired, report.checked, report.failed
                );
                for failure in &report.failures {
                    eprintln!("⚠️  {}: {}", failure.path.display(), failure.message);
                }
            }
        }
        Command::List { export_root, json } => {
            let mut registry = CatalogRegistry::new();
            let handle = registry
                .open(&export_root)
                .with_context(|| format!("opening catalog in {}", export_root.display()))?;
            let entries = handle
                .lock()
                .map_err(|_| anyhow::anyhow!("catalog handle poisoned"))?
                .entries()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in &entries {
                    let thumb = entry
                        .thumb
                        .map(|t| format!("{}x{}", t.width, t.height))
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{}  {}  {:>9}  {}",
                        entry.capture_date.format("%Y-%m-%d %H:%M"),
                        entry.content_hash.get(..12).unwrap_or(&entry.content_hash),
                        thumb,
                        entry.dest_path
                    );
                }
                println!("📊 {} images in catalog", entries.len());
            }
        }
    }
    Ok(())
}

fn open_ingestor(export_root: &Path, config: IngestConfig) -> anyhow::Result<Ingestor> {
    let mut registry = CatalogRegistry::new();
    Ingestor::open(&mut registry, export_root, config)
        .with_context(|| format!("opening archive {}", export_root.display()))
}

/// First Ctrl-C stops the run after the file in flight
fn cancel_on_ctrl_c(ingestor: &Ingestor) {
    let flag = ingestor.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current file");
            flag.cancel();
        }
    });
}
