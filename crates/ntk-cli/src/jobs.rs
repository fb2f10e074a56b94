//! `plan-copy-jobs`: move a dataset's ntuples into the group area.
//!
//! Every ntuple listed in a dataset XML that lives on `/nfs` or `/pnfs`
//! outside the group area gets a destination under
//! [`GROUP_DIRECTORY`]`/<branch>/...`. The pairs are split into HTCondor DAG
//! nodes that run `copy-compress` on each pair. Alongside the DAG go the
//! mapping, the XML with new file names, and a `gfal-rm` script for the
//! originals.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};

/// SRM endpoint prefixed to `/pnfs` paths for `gfal-rm`.
pub const SRM_PREFIX: &str = "srm://dcache-se-cms.desy.de:8443";

/// Destination root shared by the group.
pub const GROUP_DIRECTORY: &str = "/pnfs/desy.de/cms/tier2/store/group/uhh/uhh2ntuples/";

/// Ntuple production branches, newest first.
pub const KNOWN_BRANCHES: [&str; 9] = [
    "RunII_102X_v2",
    "RunII_102X_v1",
    "RunII_101_v1",
    "RunII_94X_v3",
    "RunII_94X_v2",
    "RunII_94X_v1",
    "RunII_80X_v5",
    "RunII_80X_v4",
    "RunII_80X_v3",
];

/// Directory names people used instead of a branch name.
const MANUAL_MAPPINGS: [(&str, &[&str]); 1] = [(
    "RunII_80X_v3",
    &[
        "CMSSW80v3",
        "Moriond17",
        "Moriond17_80X_v3",
        "RunII_80X_Moriond17",
        "RunII_80X_v3_Dep2016Campaign",
        "RunII_80X_v3_legacy",
        "CMSSW8024",
        "RunII_80X_v3_Background",
        "RunII_80X_v3_Data",
        "RunII_80X_v3_Signal",
        "NTuples_Moriond17",
    ],
)];

const DAG_NAME: &str = "copyCompress.dag";

const JOB_TEMPLATE: &str = r#"
requirements      = OpSysAndVer == "SL6"
universe          = vanilla
initialdir        = {initialdir}
output            = $(logpath).o$(ClusterId).$(Process)
error             = $(logpath).e$(ClusterId).$(Process)
log               = $(logpath).$(Cluster).log
getenv            = True
JobBatchName      = $(JOB)
executable        = htcScript.sh
use_x509userproxy = True
x509userproxy     = $ENV(HOME)/x509_proxy
arguments         = $(scriptargs)
queue
"#;

/// Collapse `//`, `.` and `..` without touching the filesystem.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    let joined = parts.join("/");
    if path.starts_with('/') { format!("/{}", joined) } else { joined }
}

fn is_comment(line: &str) -> bool {
    line.starts_with("<!--") || line.starts_with("-->")
}

/// The ntuple path of an `<In FileName="..." Lumi="0.0"/>` line.
pub fn extract_root_filename(line: &str) -> String {
    normalize_path(&line.trim().replace("<In FileName=\"", "").replace("\" Lumi=\"0.0\"/>", ""))
}

/// Ntuples of a dataset XML stored on `/nfs` or `/pnfs`, in file order.
pub fn root_files_from_xml(xml: &str) -> Vec<String> {
    xml.lines()
        .map(str::trim)
        .filter(|line| !is_comment(line))
        .map(extract_root_filename)
        .filter(|f| f.starts_with("/nfs") || f.starts_with("/pnfs"))
        .collect()
}

fn chopped(branch: &str) -> &str {
    branch.strip_prefix("RunII_").unwrap_or(branch)
}

fn manual_mapping(dir: &str) -> Option<&'static str> {
    MANUAL_MAPPINGS.iter().find(|(_, aliases)| aliases.contains(&dir)).map(|(branch, _)| *branch)
}

/// Suffix below the group directory derived from the highest directory that
/// names a branch.
fn branch_suffix(parts: &[&str]) -> Option<String> {
    let nest = |branch: &str, rest: &[&str]| {
        std::iter::once(branch).chain(rest.iter().copied()).collect::<Vec<_>>().join("/")
    };
    for (ind, part) in parts.iter().enumerate() {
        if part.contains("RunII") {
            if KNOWN_BRANCHES.contains(part) {
                return Some(parts[ind..].join("/"));
            }
            if let Some(kb) = KNOWN_BRANCHES.iter().find(|kb| part.contains(*kb)) {
                return Some(nest(kb, &parts[ind..]));
            }
        }
        for kb in KNOWN_BRANCHES {
            let short = chopped(kb);
            if *part == short {
                return Some(nest(kb, &parts[ind + 1..]));
            }
            if part.contains(short) {
                return Some(nest(kb, &parts[ind..]));
            }
        }
        if let Some(kb) = manual_mapping(part) {
            return Some(nest(kb, &parts[ind + 1..]));
        }
    }
    None
}

/// Everything after `.../user/<name>/`, placed under `branch`.
fn user_suffix(parts: &[&str], branch: &str) -> Option<String> {
    let user = parts.iter().position(|p| *p == "user")?;
    let mut start = user + 2;
    let first = parts.get(start)?;
    if *first == branch || *first == chopped(branch) {
        start += 1;
    }
    Some(std::iter::once(branch).chain(parts[start..].iter().copied()).collect::<Vec<_>>().join("/"))
}

/// Group-area destination of `filename`. `branch` is used when no directory
/// of the path names a branch.
pub fn destination(filename: &str, branch: Option<&str>) -> Result<String> {
    let filename = normalize_path(filename.trim());
    if filename.starts_with(GROUP_DIRECTORY) {
        return Ok(filename);
    }
    let parts: Vec<&str> = filename.split('/').collect();
    let suffix = branch_suffix(&parts).or_else(|| branch.and_then(|b| user_suffix(&parts, b)));
    let Some(suffix) = suffix else {
        bail!("No idea how to handle this filename {}", filename);
    };
    if suffix.is_empty() || suffix.starts_with('/') {
        bail!("Bad destination suffix '{}' for {}", suffix, filename);
    }
    Ok(format!("{}{}", GROUP_DIRECTORY, suffix))
}

/// `(source, destination)` for every file, first occurrence kept.
pub fn filename_mapping(files: &[String], branch: Option<&str>) -> Result<Vec<(String, String)>> {
    let mut seen = HashSet::new();
    files
        .iter()
        .filter(|f| seen.insert(f.as_str()))
        .map(|f| Ok((f.clone(), destination(f, branch)?)))
        .collect()
}

/// The first known branch name found walking `path` upwards.
pub fn branch_from_path(path: &Path) -> Option<String> {
    path.components()
        .rev()
        .filter_map(|c| c.as_os_str().to_str())
        .find(|c| KNOWN_BRANCHES.contains(c))
        .map(str::to_string)
}

/// One DAG node: copy a group of files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyJob {
    /// Node name.
    pub name: String,
    /// Prefix of the node's log files.
    pub logpath: String,
    /// `src:dest` pairs handed to the job script.
    pub scriptargs: String,
}

/// Split `mapping` into jobs of at most `num_per_job` pairs.
pub fn copy_jobs(mapping: &[(String, String)], num_per_job: usize, log_dir: &Path, base_name: &str) -> Vec<CopyJob> {
    mapping
        .chunks(num_per_job.max(1))
        .enumerate()
        .map(|(ind, group)| CopyJob {
            name: format!("{}_{}", base_name, ind),
            logpath: log_dir.join(format!("job{}", ind)).display().to_string(),
            scriptargs: group.iter().map(|(s, d)| format!("{}:{}", s, d)).collect::<Vec<_>>().join(" "),
        })
        .collect()
}

/// HTCondor submit description shared by all nodes.
pub fn job_file(initial_dir: &Path) -> String {
    JOB_TEMPLATE.replace("{initialdir}", &initial_dir.display().to_string())
}

/// DAG description: one node per job, retried twice unless the job exits 111.
pub fn dag_file(jobs: &[CopyJob], job_filename: &Path, status_filename: &Path) -> String {
    let mut out = String::new();
    for job in jobs {
        out.push_str(&format!("JOB {} {}\n", job.name, job_filename.display()));
        out.push_str(&format!(
            "VARS {} logpath=\"{}\" scriptargs=\"{}\"\n",
            job.name, job.logpath, job.scriptargs
        ));
    }
    out.push_str("RETRY ALL_NODES 2 UNLESS-EXIT 111\n");
    out.push_str(&format!("NODE_STATUS_FILE {} 30 ALWAYS-UPDATE\n", status_filename.display()));
    out
}

/// `xml` with every relocated ntuple pointing at its destination.
pub fn rewrite_xml(xml: &str, mapping: &[(String, String)]) -> String {
    let mut out = String::new();
    for line in xml.lines() {
        let line = line.trim();
        let mut new_line = line.to_string();
        if !is_comment(line) {
            let file = extract_root_filename(line);
            if let Some((_, dest)) = mapping.iter().find(|(src, _)| *src == file) {
                new_line = format!("<In FileName=\"{}\" Lumi=\"0.0\"/>", dest);
            }
        }
        out.push_str(&new_line);
        out.push('\n');
    }
    out
}

/// Shell script removing the original files from the storage element.
pub fn gfal_rm_script(files: &[String]) -> String {
    let mut out = String::from("#!/usr/bin/bash -e\n");
    for f in files {
        if f.starts_with(SRM_PREFIX) {
            out.push_str(&format!("gfal-rm {}\n", f));
        } else {
            out.push_str(&format!("gfal-rm {}{}\n", SRM_PREFIX, f));
        }
    }
    out
}

/// Inputs of a planning run.
#[derive(Debug, Clone)]
pub struct PlanOptions {
    /// Dataset XML.
    pub xml: PathBuf,
    /// Branch used for paths that do not name one.
    pub branch: Option<String>,
    /// Files per job.
    pub num_per_job: usize,
    /// Directory holding one job directory per XML.
    pub jobs_dir: PathBuf,
    /// `initialdir` of the jobs (where `htcScript.sh` lives).
    pub initial_dir: PathBuf,
}

/// Files written by [`plan`].
#[derive(Debug, Clone)]
pub struct Plan {
    /// Relocated files.
    pub mapping: Vec<(String, String)>,
    /// DAG nodes.
    pub jobs: Vec<CopyJob>,
    /// Job directory.
    pub job_dir: PathBuf,
    /// The DAG file.
    pub dag: PathBuf,
    /// The DAG status file.
    pub status: PathBuf,
    /// The rewritten XML.
    pub new_xml: PathBuf,
    /// The removal script.
    pub rm_script: PathBuf,
}

/// Build the mapping and write every job file. Nothing is submitted.
pub fn plan(opts: &PlanOptions) -> Result<Plan> {
    let xml = fs::read_to_string(&opts.xml)
        .with_context(|| format!("Cannot find XML file {}", opts.xml.display()))?;
    let base_name = opts
        .xml
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("Bad XML file name {}", opts.xml.display()))?
        .to_string();

    let job_dir = opts.jobs_dir.join(&base_name);
    let log_dir = job_dir.join("logs");
    if job_dir.is_dir() {
        fs::remove_dir_all(&job_dir).with_context(|| format!("Couldn't clear {}", job_dir.display()))?;
    }
    fs::create_dir_all(&log_dir).with_context(|| format!("Couldn't create {}", log_dir.display()))?;

    let branch = match &opts.branch {
        Some(b) => Some(b.clone()),
        None => branch_from_path(&std::path::absolute(&opts.xml)?),
    };
    tracing::debug!(?branch, "branch for paths without one");

    let files: Vec<String> =
        root_files_from_xml(&xml).into_iter().filter(|f| !f.starts_with(GROUP_DIRECTORY)).collect();
    let mapping = filename_mapping(&files, branch.as_deref())?;
    let mapping_txt: String = mapping.iter().map(|(s, d)| format!("{}:{}\n", s, d)).collect();
    write(&job_dir.join("mapping.txt"), &mapping_txt)?;

    let jobs = copy_jobs(&mapping, opts.num_per_job, &log_dir, &base_name);
    let dag = job_dir.join(DAG_NAME);
    let job_path = dag.with_extension("job");
    let status = job_dir.join(format!("{}.status", DAG_NAME));
    write(&job_path, &job_file(&opts.initial_dir))?;
    write(&dag, &dag_file(&jobs, &job_path, &status))?;

    let mut new_xml = opts.xml.clone().into_os_string();
    new_xml.push(".new");
    let new_xml = PathBuf::from(new_xml);
    write(&new_xml, &rewrite_xml(&xml, &mapping))?;

    let rm_script = opts.jobs_dir.join(format!("rm_{}.sh", base_name));
    let originals: Vec<String> = mapping.iter().map(|(s, _)| s.clone()).collect();
    write(&rm_script, &gfal_rm_script(&originals))?;

    tracing::info!(jobs = jobs.len(), files = mapping.len(), "planned {}", dag.display());
    Ok(Plan { mapping, jobs, job_dir, dag, status, new_xml, rm_script })
}

fn write(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("Couldn't write {}", path.display()))
}

/// Check the VOMS proxy and copy it where the job file expects it.
pub fn setup_voms() -> Result<()> {
    let valid = Command::new("voms-proxy-info")
        .arg("-e")
        .status()
        .context("Couldn't run voms-proxy-info")?
        .success();
    if !valid {
        bail!("You need a valid voms proxy. Please run:\n\n    voms-proxy-init -voms cms\n\nThen retry");
    }
    let copied = Command::new("sh")
        .arg("-c")
        .arg("cp $(voms-proxy-info -p) ~/x509_proxy")
        .status()
        .context("Couldn't copy the voms proxy")?
        .success();
    if !copied {
        bail!("Couldn't copy the voms proxy to ~/x509_proxy");
    }
    Ok(())
}

/// Hand the DAG to HTCondor.
pub fn submit(dag: &Path) -> Result<()> {
    let ok = Command::new("condor_submit_dag")
        .arg(dag)
        .status()
        .context("Couldn't run condor_submit_dag")?
        .success();
    if !ok {
        bail!("condor_submit_dag failed for {}", dag.display());
    }
    Ok(())
}
