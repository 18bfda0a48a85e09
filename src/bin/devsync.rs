//! Devsync CLI - mirror a device into a destination file, writing only
//! changed blocks.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use devsync::{sync_paths, ConsoleProgress, NoProgress, SyncBuilder, SyncConfig, SyncStats};

/// Devsync - incremental block-level device mirroring
#[derive(Parser, Debug)]
#[command(name = "devsync")]
#[command(version)]
#[command(about = "Mirror a block device into a file, writing only changed blocks")]
#[command(long_about = None)]
struct Cli {
    /// Source block device or file (opened read-only)
    source: PathBuf,

    /// Destination file (created if absent)
    destination: PathBuf,

    /// Comparison block size in bytes (512-65536, power of 2)
    #[arg(short, long, default_value_t = devsync::DEFAULT_BLOCK_SIZE)]
    block_size: usize,

    /// Bulk read size in bytes (power of 2, at least the block size)
    #[arg(short, long, default_value_t = devsync::DEFAULT_SUPERBLOCK_SIZE)]
    superblock_size: usize,

    /// Do not print the progress line
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // Usage errors exit 1; --help and --version are not errors.
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(&cli) {
        Ok(stats) => {
            eprintln!("{}", stats.summary());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> devsync::Result<SyncStats> {
    let config: SyncConfig = SyncBuilder::new()
        .block_size(cli.block_size)
        .superblock_size(cli.superblock_size)
        .try_build()?;

    if cli.quiet {
        sync_paths(&cli.source, &cli.destination, config, &mut NoProgress)
    } else {
        let mut progress = ConsoleProgress::new(io::stdout().lock());
        sync_paths(&cli.source, &cli.destination, config, &mut progress)
    }
}
