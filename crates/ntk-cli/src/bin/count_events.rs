//! Print the number of entries of `AnalysisTree`.

use anyhow::Result;
use clap::Parser;
use ntk_cli::count::{CountMode, count_events};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "count-events")]
#[command(about = "Count entries of AnalysisTree in <source>")]
#[command(version)]
struct Cli {
    /// Source ROOT file
    source: PathBuf,

    /// "1" for the cached count, anything else to iterate over every entry
    #[arg(allow_hyphen_values = true)]
    mode: String,

    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: tracing::Level,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    ntk_cli::logging::init(cli.log_level);

    let n = count_events(&cli.source, CountMode::from_arg(&cli.mode))?;
    println!("{}", n);
    Ok(())
}
