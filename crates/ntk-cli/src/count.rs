//! `count-events`: entries of `AnalysisTree`, cached or counted.

use std::path::Path;

use anyhow::{Context, Result};
use ntk_root::{RootFile, visit_entries};

use crate::ANALYSIS_TREE;

/// How entries are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountMode {
    /// The cached `fEntries`.
    Fast,
    /// Visit every entry.
    Slow,
}

impl CountMode {
    /// `"1"` selects the fast count; every other string the slow one.
    pub fn from_arg(mode: &str) -> Self {
        if mode == "1" { CountMode::Fast } else { CountMode::Slow }
    }
}

/// Number of entries in `AnalysisTree` of `src`.
pub fn count_events(src: &Path, mode: CountMode) -> Result<u64> {
    let file =
        RootFile::open(src).with_context(|| format!("Couldn't open source {}", src.display()))?;
    let tree = file
        .get_tree(ANALYSIS_TREE)
        .with_context(|| format!("Couldn't get tree from {}", src.display()))?;
    let count = match mode {
        CountMode::Fast => tree.entries,
        CountMode::Slow => visit_entries(&file, &tree).with_context(|| {
            format!("Couldn't read entries of {} in {}", ANALYSIS_TREE, src.display())
        })?,
    };
    tracing::debug!(?mode, count, "counted {}", src.display());
    Ok(count)
}
