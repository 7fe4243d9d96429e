//! bandstack CLI: align the bands of one capture described by a JSON config.

use bandstack::align::{AlignmentReport, Strictness};
use bandstack::load::{align_config, load_config, save_aligned_bands};
use clap::{Args, Parser, Subcommand};
use log::{info, LevelFilter};
use std::error::Error;
use std::path::{Path, PathBuf};

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "bandstack")]
#[command(about = "Align multi-band aerial captures with ECC registration")]
#[command(version)]
struct Cli {
    /// Log more (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON log lines (requires the `tracing` feature).
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Align a capture and write its alignment report.
    Align(AlignArgs),
    /// Print a saved alignment report.
    Report {
        /// Path to a report written by `align`.
        path: PathBuf,
    },
}

#[derive(Debug, Clone, Args)]
struct AlignArgs {
    /// Capture config (JSON).
    config: PathBuf,

    /// Where to write the report; overrides the config.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Override the reference band index.
    #[arg(long)]
    reference: Option<usize>,

    /// Reject the capture if any band fails.
    #[arg(long, conflicts_with = "lenient")]
    strict: bool,

    /// Fall back to identity for bands that fail.
    #[arg(long)]
    lenient: bool,

    /// Write each aligned band as 16-bit PNG into this directory.
    #[arg(long)]
    write_bands: Option<PathBuf>,
}

fn init_logging(verbose: u8, json: bool) {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    #[cfg(feature = "tracing")]
    {
        let _ = tracing_log::LogTracer::init_with_filter(level);
        bandstack::core::init_tracing(json);
    }
    #[cfg(not(feature = "tracing"))]
    {
        if json {
            eprintln!("--log-json needs the `tracing` feature; using plain logs");
        }
        let _ = bandstack::core::init_from_env(level);
    }
}

fn run_align(args: &AlignArgs) -> CliResult<()> {
    let mut config = load_config(&args.config)?;
    if let Some(reference) = args.reference {
        config.alignment.reference_index = reference;
    }
    if args.strict {
        config.alignment.strictness = Strictness::Strict;
    } else if args.lenient {
        config.alignment.strictness = Strictness::Lenient;
    }
    let report_path = args.report.clone().unwrap_or_else(|| config.report_path());

    let run = align_config(&config)?;
    run.report.write_json(&report_path)?;
    info!("report written to {}", report_path.display());

    if let Some(dir) = &args.write_bands {
        let written = save_aligned_bands(&run.processed, dir)?;
        info!("wrote {} aligned bands to {}", written.len(), dir.display());
    }

    let crop = run.processed.crop;
    println!(
        "aligned {} bands, crop {}x{} at ({}, {}), {} failed",
        run.processed.resolved.len(),
        crop.width,
        crop.height,
        crop.left,
        crop.top,
        run.report.failures.len()
    );
    Ok(())
}

fn run_report(path: &Path) -> CliResult<()> {
    let report = AlignmentReport::load_json(path)?;
    println!("reference band: {}", report.reference);
    for (band, t) in report.transforms.iter().enumerate() {
        match t {
            Some(t) => {
                let (tx, ty) = t.translation_part();
                println!(
                    "band {band}: t=({tx:.3}, {ty:.3}) rot={:.4} deg",
                    t.rotation_degrees()
                );
            }
            None => println!("band {band}: unresolved"),
        }
    }
    for f in &report.failures {
        println!("band {} <- {}: {}", f.band, f.anchor, f.message);
    }
    if let Some(crop) = report.crop {
        println!(
            "crop: {}x{} at ({}, {})",
            crop.width, crop.height, crop.left, crop.top
        );
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);
    let result = match &cli.command {
        Commands::Align(args) => run_align(args),
        Commands::Report { path } => run_report(path),
    };
    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
