//! Copy `AnalysisTree` into a new file at maximum compression.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "copy-compress")]
#[command(about = "Copy AnalysisTree from <source> to <destination> with maximum compression (LZMA 9)")]
#[command(version)]
struct Cli {
    /// Source ROOT file
    source: PathBuf,

    /// Destination ROOT file (recreated)
    destination: PathBuf,

    /// Threads for basket recompression (1 = sequential). Output does not depend on it.
    #[arg(long, default_value = "1")]
    threads: usize,

    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: tracing::Level,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    ntk_cli::logging::init(cli.log_level);

    ntk_cli::copy::copy_compress(&cli.source, &cli.destination, cli.threads)?;
    Ok(())
}
