//! Prepare (and submit) HTCondor jobs copy-compressing a dataset into the group area.

use anyhow::{Context, Result};
use clap::Parser;
use ntk_cli::jobs::{self, PlanOptions};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "plan-copy-jobs")]
#[command(about = "Create & run HTCondor jobs copying the ntuples of a dataset XML to the group area")]
#[command(version)]
struct Cli {
    /// Dataset XML file to process
    xml: PathBuf,

    /// Branch name for paths that do not contain one (default: from the XML location)
    #[arg(long)]
    branch: Option<String>,

    /// Number of files to copy per job
    #[arg(long, default_value = "50")]
    num_per_job: usize,

    /// Directory for the job files
    #[arg(long, default_value = "jobs")]
    jobs_dir: PathBuf,

    /// Job initialdir holding htcScript.sh (default: directory of this executable)
    #[arg(long)]
    initial_dir: Option<PathBuf>,

    /// Make job files, but don't submit them
    #[arg(long)]
    dry_run: bool,

    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: tracing::Level,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    ntk_cli::logging::init(cli.log_level);

    let initial_dir = match cli.initial_dir {
        Some(dir) => dir,
        None => std::env::current_exe()
            .context("Couldn't locate this executable")?
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default(),
    };

    if !cli.dry_run {
        jobs::setup_voms()?;
    }

    let plan = jobs::plan(&PlanOptions {
        xml: cli.xml,
        branch: cli.branch,
        num_per_job: cli.num_per_job,
        jobs_dir: cli.jobs_dir,
        initial_dir,
    })?;
    println!("Running {} jobs to move {} files", plan.jobs.len(), plan.mapping.len());

    if !cli.dry_run {
        jobs::submit(&plan.dag)?;
        println!("Check status with:");
        println!("./DAGstatus {}", plan.status.display());
    }

    println!("XML file with replacements written to {}", plan.new_xml.display());
    println!("Please only commit when all copying jobs completed successfully");
    println!("Script to remove the originals: {}", plan.rm_script.display());
    Ok(())
}
