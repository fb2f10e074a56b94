//! `copy-compress`: clone `AnalysisTree` at maximum compression.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use ntk_root::{CloneOptions, CloneSummary, CompressionSetting, RootFile, RootWriter, clone_tree_with};

use crate::ANALYSIS_TREE;

/// Copy `AnalysisTree` from `src` into a recreated `dest` at
/// [`CompressionSetting::MAX`].
///
/// The destination is only created once the source opened and holds the
/// tree, and never when it resolves to the source itself. `threads` > 1
/// recompresses baskets in parallel; the output is the same either way.
pub fn copy_compress(src: &Path, dest: &Path, threads: usize) -> Result<CloneSummary> {
    let source =
        RootFile::open(src).with_context(|| format!("Couldn't open source {}", src.display()))?;
    let tree = source
        .get_tree(ANALYSIS_TREE)
        .with_context(|| format!("Couldn't get tree from {}", src.display()))?;
    tracing::debug!(entries = tree.entries, branches = tree.branches.len(), "found {}", ANALYSIS_TREE);

    if same_file(src, dest) {
        bail!("Couldn't open destination {}: it is the source file", dest.display());
    }

    let mut out = RootWriter::create(dest, CompressionSetting::MAX)
        .with_context(|| format!("Couldn't open destination {}", dest.display()))?;
    let summary = clone_tree_with(&source, ANALYSIS_TREE, &mut out, CloneOptions { threads })
        .with_context(|| format!("Couldn't copy {} from {} to {}", ANALYSIS_TREE, src.display(), dest.display()))?;
    out.close().with_context(|| format!("Couldn't finish writing {}", dest.display()))?;

    tracing::info!(
        entries = summary.entries,
        baskets = summary.baskets,
        bytes_in = summary.zip_bytes_in,
        bytes_out = summary.zip_bytes_out,
        "copied {} -> {}",
        src.display(),
        dest.display()
    );
    Ok(summary)
}

/// Whether both paths resolve to the same existing file.
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_file_follows_spelling_differences() {
        let dir = std::env::temp_dir().join(format!("ntk-cli-same-{}", std::process::id()));
        fs::create_dir_all(dir.join("sub")).unwrap();
        let file = dir.join("in.root");
        fs::write(&file, b"x").unwrap();

        assert!(same_file(&file, &dir.join("sub/../in.root")));
        assert!(!same_file(&file, &dir.join("out.root")));
        fs::write(dir.join("out.root"), b"x").unwrap();
        assert!(!same_file(&file, &dir.join("out.root")));
        fs::remove_dir_all(&dir).unwrap();
    }
}
