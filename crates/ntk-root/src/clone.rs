//! Deep copy of a TTree into another file at a new compression setting.
//!
//! The tree record is copied byte for byte and patched in place at the
//! positions [`read_ttree`](crate::objects::read_ttree) recorded, so branch
//! and leaf classes the reader does not model survive the copy untouched.
//! Baskets are decompressed, checked, recompressed and appended with their
//! original key header relocated.

use rayon::prelude::*;

use crate::basket::{Basket, read_record};
use crate::compress::CompressionSetting;
use crate::decompress::decompress;
use crate::error::{Result, RootError};
use crate::file::RootFile;
use crate::key::patch_header;
use crate::objects::read_ttree;
use crate::tree::{BranchInfo, Tree};
use crate::wbuffer::{patch_i32, patch_i64};
use crate::writer::{BEGIN, RootWriter};

/// Baskets recompressed together before being written out.
const BATCH_BASKETS: usize = 64;

/// Tuning for [`clone_tree_with`].
#[derive(Debug, Clone, Copy)]
pub struct CloneOptions {
    /// Worker threads for basket recompression; 0 and 1 mean sequential.
    pub threads: usize,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self { threads: 1 }
    }
}

/// What a clone wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloneSummary {
    /// `fEntries` of the tree.
    pub entries: u64,
    /// Branches copied (flattened).
    pub branches: usize,
    /// Basket records rewritten.
    pub baskets: usize,
    /// Stored basket bytes in the source.
    pub zip_bytes_in: u64,
    /// Stored basket bytes in the destination.
    pub zip_bytes_out: u64,
}

/// Copy tree `name` (highest cycle) from `source` into `dest`.
pub fn clone_tree(source: &RootFile, name: &str, dest: &mut RootWriter) -> Result<CloneSummary> {
    clone_tree_with(source, name, dest, CloneOptions::default())
}

/// [`clone_tree`] with explicit options.
pub fn clone_tree_with(
    source: &RootFile,
    name: &str,
    dest: &mut RootWriter,
    options: CloneOptions,
) -> Result<CloneSummary> {
    let (key, mut payload) = source.tree_record(name)?;
    let tree = read_ttree(&payload, key.key_len as usize)?;
    if tree.layout.has_branch_refs {
        return Err(RootError::Unsupported(format!(
            "tree '{}' references branches instead of storing them inline",
            name
        )));
    }

    if let Some((mut info_key, info)) = source.streamer_info()? {
        info_key.datime = dest.datime();
        dest.write_streamer_info(info_key, &info)?;
    }

    let jobs: Vec<BasketJob> = tree
        .branches
        .iter()
        .enumerate()
        .flat_map(|(b, branch)| {
            (0..branch.n_baskets).map(move |i| BasketJob { branch: b, index: i, seek: branch.basket_seek[i] })
        })
        .collect();

    let pool = if options.threads > 1 {
        Some(
            rayon::ThreadPoolBuilder::new()
                .num_threads(options.threads)
                .build()
                .map_err(|e| RootError::Unsupported(format!("thread pool: {}", e)))?,
        )
    } else {
        None
    };

    let file_data = source.file_data();
    let setting = dest.setting();
    let mut relocated: Vec<Vec<(u32, u64)>> =
        tree.branches.iter().map(|b| Vec::with_capacity(b.n_baskets)).collect();

    for batch in jobs.chunks(BATCH_BASKETS) {
        let prepare = |job: &BasketJob| recompress(file_data, &tree.branches[job.branch], job, setting);
        let records: Vec<Result<Vec<u8>>> = match &pool {
            Some(pool) => pool.install(|| batch.par_iter().map(prepare).collect()),
            None => batch.iter().map(prepare).collect(),
        };
        for (job, record) in batch.iter().zip(records) {
            let mut record = record?;
            let seek = dest.end();
            let n_bytes = record.len() as u32;
            patch_header(&mut record, n_bytes, seek, BEGIN)?;
            dest.write_raw(&record)?;
            relocated[job.branch].push((n_bytes, seek));
        }
    }

    let summary = patch_tree(&mut payload, &tree, &relocated, setting)?;
    let mut key = key;
    key.datime = dest.datime();
    dest.write_object(key, &payload)?;

    log::debug!(
        "cloned '{}': {} entries, {} baskets, {} -> {} bytes",
        name,
        summary.entries,
        summary.baskets,
        summary.zip_bytes_in,
        summary.zip_bytes_out
    );
    Ok(summary)
}

struct BasketJob {
    branch: usize,
    index: usize,
    seek: u64,
}

/// Read one basket and rebuild its record at `setting`. The returned record
/// still carries the source position; the caller relocates it.
fn recompress(
    file_data: &[u8],
    branch: &BranchInfo,
    job: &BasketJob,
    setting: CompressionSetting,
) -> Result<Vec<u8>> {
    let (header, stored) = read_record(file_data, job.seek)?;
    let key_len = header.key.key_len as usize;
    let obj_len = header.key.obj_len as usize;
    let payload =
        if header.key.is_uncompressed() { stored.to_vec() } else { decompress(stored, obj_len)? };

    let basket = Basket::from_parts(header, payload)?;
    let span = branch.basket_range(job.index).map(|(first, last)| last.saturating_sub(first));
    if span != Some(basket.n_entries() as u64) {
        return Err(RootError::EntryMismatch(format!(
            "branch '{}' basket {} holds {} entries, index says {:?}",
            branch.name,
            job.index,
            basket.n_entries(),
            span
        )));
    }

    let payload = basket.into_payload();
    let compressed = setting.compress(&payload)?;
    let body = compressed.as_deref().unwrap_or(&payload);

    let start = job.seek as usize;
    let mut record = Vec::with_capacity(key_len + body.len());
    record.extend_from_slice(&file_data[start..start + key_len]);
    record.extend_from_slice(body);
    Ok(record)
}

/// Point the copied tree metadata at the relocated baskets.
fn patch_tree(
    payload: &mut [u8],
    tree: &Tree,
    relocated: &[Vec<(u32, u64)>],
    setting: CompressionSetting,
) -> Result<CloneSummary> {
    let mut summary = CloneSummary { entries: tree.entries, branches: tree.branches.len(), ..Default::default() };

    for (branch, moved) in tree.branches.iter().zip(relocated) {
        let layout = &branch.layout;
        patch_i32(payload, layout.compress_pos, setting.code());
        if moved.is_empty() {
            continue;
        }

        let missing = || RootError::Deserialization(format!("branch '{}': basket arrays not stored", branch.name));
        let bytes_pos = layout.basket_bytes_pos.ok_or_else(missing)?;
        let seek_pos = layout.basket_seek_pos.ok_or_else(missing)?;

        let mut old_sum = 0i64;
        let mut new_sum = 0i64;
        for (i, &(n_bytes, seek)) in moved.iter().enumerate() {
            old_sum += branch.basket_bytes[i] as i64;
            new_sum += n_bytes as i64;
            patch_i32(payload, bytes_pos + 4 * i, n_bytes as i32);
            patch_i64(payload, seek_pos + 8 * i, seek as i64);
        }
        patch_i64(payload, layout.zip_bytes_pos, branch.zip_bytes - old_sum + new_sum);

        summary.baskets += moved.len();
        summary.zip_bytes_in += old_sum as u64;
        summary.zip_bytes_out += new_sum as u64;
    }

    let delta = summary.zip_bytes_out as i64 - summary.zip_bytes_in as i64;
    patch_i64(payload, tree.layout.zip_bytes_pos, tree.zip_bytes + delta);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree_writer::{Shape, TreeWriter, Values};

    fn temp_path(name: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("ntk-clone-{}-{}-{}.root", name, std::process::id(), nanos))
    }

    fn source(path: &std::path::Path) {
        let mut w = RootWriter::create(path, CompressionSetting::NONE).unwrap();
        TreeWriter::new("AnalysisTree", "events")
            .with_basket_entries(50)
            .column("run", Shape::Scalar, Values::I32(vec![7; 200]))
            .column("met", Shape::Scalar, Values::F64((0..200).map(|i| i as f64 * 0.5).collect()))
            .write(&mut w)
            .unwrap();
        w.close().unwrap();
    }

    #[test]
    fn clone_patches_metadata() {
        let (src, dst) = (temp_path("src"), temp_path("dst"));
        source(&src);

        let input = RootFile::open(&src).unwrap();
        let mut out = RootWriter::create(&dst, CompressionSetting::MAX).unwrap();
        let summary = clone_tree(&input, "AnalysisTree", &mut out).unwrap();
        out.close().unwrap();
        assert_eq!(summary.entries, 200);
        assert_eq!(summary.baskets, 8);
        assert!(summary.zip_bytes_out < summary.zip_bytes_in);

        let copy = RootFile::open(&dst).unwrap();
        let tree = copy.get_tree("AnalysisTree").unwrap();
        let original = input.get_tree("AnalysisTree").unwrap();
        assert_eq!(tree.entries, 200);
        for b in &tree.branches {
            assert_eq!(b.compress, 209);
            assert_eq!(b.zip_bytes, b.basket_bytes.iter().map(|&n| n as i64).sum::<i64>());
        }
        assert_eq!(tree.zip_bytes as u64, summary.zip_bytes_out);
        assert_eq!(
            copy.branch_data(&tree, "met").unwrap(),
            input.branch_data(&original, "met").unwrap()
        );
        std::fs::remove_file(&src).unwrap();
        std::fs::remove_file(&dst).unwrap();
    }

    #[test]
    fn output_does_not_depend_on_threads() {
        let src = temp_path("threads-src");
        source(&src);
        let input = RootFile::open(&src).unwrap();

        let mut layouts = Vec::new();
        for threads in [1, 4] {
            let dst = temp_path("threads-dst");
            let mut out = RootWriter::create(&dst, CompressionSetting::MAX).unwrap();
            clone_tree_with(&input, "AnalysisTree", &mut out, CloneOptions { threads }).unwrap();
            out.close().unwrap();
            let copy = RootFile::open(&dst).unwrap();
            let tree = copy.get_tree("AnalysisTree").unwrap();
            layouts.push(tree.branches.iter().map(|b| (b.basket_bytes.clone(), b.basket_seek.clone())).collect::<Vec<_>>());
            std::fs::remove_file(&dst).unwrap();
        }
        assert_eq!(layouts[0], layouts[1]);
        std::fs::remove_file(&src).unwrap();
    }

    #[test]
    fn missing_tree_is_reported() {
        let (src, dst) = (temp_path("missing-src"), temp_path("missing-dst"));
        RootWriter::create(&src, CompressionSetting::NONE).unwrap().close().unwrap();
        let input = RootFile::open(&src).unwrap();
        let mut out = RootWriter::create(&dst, CompressionSetting::MAX).unwrap();
        assert!(matches!(clone_tree(&input, "AnalysisTree", &mut out), Err(RootError::TreeNotFound(_))));
        std::fs::remove_file(&src).unwrap();
        std::fs::remove_file(&dst).unwrap();
    }
}
