//! TTree and TBranch binary deserialization from ROOT streamer format.

use std::collections::HashMap;

use crate::error::{Result, RootError};
use crate::rbuffer::{K_BYTE_COUNT_MASK, K_CLASS_MASK, K_MAP_OFFSET, K_NEW_CLASS_TAG, RBuffer};
use crate::tree::{BranchInfo, BranchLayout, LeafInfo, LeafType, Tree, TreeLayout};

/// Oldest TTree layout understood here.
const MIN_TREE_VERSION: u16 = 16;
/// Oldest TBranch layout understood here.
const MIN_BRANCH_VERSION: u16 = 10;

/// Read a TTree from a decompressed TKey payload.
///
/// `origin` is the key header length: ROOT measures in-buffer references
/// from the start of the key, not from the start of the payload.
pub fn read_ttree(payload: &[u8], origin: usize) -> Result<Tree> {
    let mut r = RBuffer::with_origin(payload, origin);
    let mut refs = Refs::default();

    // TTree version header
    let (tree_ver, tree_end) = r.read_version()?;
    let tree_end =
        tree_end.ok_or_else(|| RootError::Deserialization("TTree missing byte count".into()))?;
    if tree_ver < MIN_TREE_VERSION {
        return Err(RootError::Unsupported(format!("TTree version {}", tree_ver)));
    }

    let (name, title) = r.read_tnamed()?;

    // TAttLine, TAttFill, TAttMarker
    r.skip_versioned()?;
    r.skip_versioned()?;
    r.skip_versioned()?;

    let entries = r.read_i64()?.max(0) as u64; // fEntries
    let tot_bytes = r.read_i64()?; // fTotBytes
    let zip_bytes_pos = r.pos();
    let zip_bytes = r.read_i64()?; // fZipBytes
    let _saved_bytes = r.read_i64()?; // fSavedBytes

    if tree_ver >= 18 {
        let _flushed_bytes = r.read_i64()?; // fFlushedBytes
    }

    let _weight = r.read_f64()?; // fWeight
    let _timer_interval = r.read_i32()?; // fTimerInterval
    let _scan_field = r.read_i32()?; // fScanField
    let _update = r.read_i32()?; // fUpdate

    if tree_ver >= 18 {
        let _default_entry_offset_len = r.read_i32()?;
    }

    let n_cluster_range = if tree_ver >= 19 { r.read_i32()?.max(0) as usize } else { 0 };

    let _max_entries = r.read_i64()?; // fMaxEntries
    let _max_entry_loop = r.read_i64()?; // fMaxEntryLoop
    let _max_virtual_size = r.read_i64()?; // fMaxVirtualSize
    let _auto_save = r.read_i64()?; // fAutoSave

    if tree_ver >= 18 {
        let _auto_flush = r.read_i64()?; // fAutoFlush
    }

    let _estimate = r.read_i64()?; // fEstimate

    // fClusterRangeEnd, fClusterSize: pointer flag, then fNClusterRange i64s
    if tree_ver >= 19 {
        for _ in 0..2 {
            if r.read_u8()? != 0 {
                r.skip(n_cluster_range * 8)?;
            }
        }
    }

    if tree_ver >= 20 {
        r.skip_versioned()?; // fIOFeatures
    }

    let mut branches = Vec::new();
    read_branch_array(&mut r, &mut refs, &mut branches)?;

    // fLeaves, fAliases, fIndexValues, ... are not needed.
    r.set_pos(tree_end);

    Ok(Tree {
        name,
        title,
        entries,
        tot_bytes,
        zip_bytes,
        branches,
        layout: TreeLayout { zip_bytes_pos, has_branch_refs: refs.has_branch_refs },
    })
}

// ── Reference tracking ─────────────────────────────────────────

/// ROOT's in-buffer reference map.
///
/// A class name is registered at the displacement of its class-tag word and
/// an object at the displacement of its byte-count word, both shifted by
/// `kMapOffset`. The map is shared by the whole TTree buffer: a leaf's count
/// leaf is usually a back-reference into another branch.
#[derive(Default)]
struct Refs {
    classes: HashMap<u32, String>,
    /// Names of already-streamed branches and leaves by object tag.
    objects: HashMap<u32, String>,
    /// Already-streamed leaves; a split collection's leaf list may only
    /// reference its count leaf.
    leaves: HashMap<u32, LeafInfo>,
    has_branch_refs: bool,
}

/// One `ReadObjectAny` slot.
enum Element {
    Null,
    /// Back-reference to an object streamed earlier in the buffer.
    Ref(u32),
    /// An inline object; its body starts at the reader's position.
    Object { class_name: String, tag: u32, end: usize },
}

impl Refs {
    fn read_element(&mut self, r: &mut RBuffer) -> Result<Element> {
        let beg = r.displacement();
        let word = r.read_u32()?;

        if word == 0 {
            return Ok(Element::Null);
        }
        if word & K_BYTE_COUNT_MASK == 0 || word == K_NEW_CLASS_TAG {
            if word == K_NEW_CLASS_TAG || word & K_CLASS_MASK != 0 {
                return Err(RootError::Deserialization(format!(
                    "object without byte count at pos {}",
                    r.pos() - 4
                )));
            }
            return Ok(Element::Ref(word));
        }

        let end = r.pos() + (word & !K_BYTE_COUNT_MASK) as usize;
        let class_tag_at = r.displacement();
        let class_tag = r.read_u32()?;

        let class_name = if class_tag == K_NEW_CLASS_TAG {
            let name = r.read_cstring()?;
            self.classes.insert((class_tag_at + K_MAP_OFFSET) as u32, name.clone());
            name
        } else if class_tag & K_CLASS_MASK != 0 {
            let tag = class_tag & !K_CLASS_MASK;
            self.classes.get(&tag).cloned().ok_or_else(|| {
                RootError::Deserialization(format!(
                    "class ref {} not found (tag={:#010x})",
                    tag, class_tag
                ))
            })?
        } else {
            return Err(RootError::Deserialization(format!(
                "unexpected class tag {:#010x} at pos {}",
                class_tag,
                r.pos() - 4
            )));
        };

        Ok(Element::Object { class_name, tag: (beg + K_MAP_OFFSET) as u32, end })
    }
}

// ── TObjArray parsing ──────────────────────────────────────────

/// Read a TObjArray header; returns `(element_count, array_end)`.
fn read_tobjarray_header(r: &mut RBuffer) -> Result<(usize, usize)> {
    let (_ver, arr_end) = r.read_version()?;
    let arr_end =
        arr_end.ok_or_else(|| RootError::Deserialization("TObjArray missing byte count".into()))?;
    r.read_tobject()?;
    let _name = r.read_string()?;
    let count = r.read_i32()?;
    let _low_bound = r.read_i32()?;
    Ok((count.max(0) as usize, arr_end))
}

/// Read a TObjArray of branches, flattening sub-branches into `out`.
fn read_branch_array(r: &mut RBuffer, refs: &mut Refs, out: &mut Vec<BranchInfo>) -> Result<()> {
    let (count, arr_end) = read_tobjarray_header(r)?;

    for _ in 0..count {
        match refs.read_element(r)? {
            Element::Null => {}
            Element::Ref(tag) => {
                log::debug!("branch array holds a reference to object {}", tag);
                refs.has_branch_refs = true;
            }
            Element::Object { class_name, tag, end } => {
                let first = out.len();
                read_branch_object(r, refs, &class_name, out)?;
                if let Some(branch) = out.get(first) {
                    refs.objects.insert(tag, branch.name.clone());
                }
                r.set_pos(end);
            }
        }
    }

    r.set_pos(arr_end);
    Ok(())
}

/// Read a `TBranch` or a class deriving from it.
fn read_branch_object(
    r: &mut RBuffer,
    refs: &mut Refs,
    class_name: &str,
    out: &mut Vec<BranchInfo>,
) -> Result<()> {
    if class_name == "TBranch" {
        return read_tbranch(r, refs, class_name, out);
    }
    if !class_name.starts_with("TBranch") {
        return Err(RootError::UnsupportedClass(class_name.to_string()));
    }

    // Derived branches stream their TBranch base first.
    let (_ver, end) = r.read_version()?;
    let end = end.ok_or_else(|| {
        RootError::Deserialization(format!("{} missing byte count", class_name))
    })?;
    read_tbranch(r, refs, class_name, out)?;
    r.set_pos(end);
    Ok(())
}

// ── TBranch parsing ────────────────────────────────────────────

/// Read a single TBranch, pushing it and then its sub-branches onto `out`.
fn read_tbranch(
    r: &mut RBuffer,
    refs: &mut Refs,
    class_name: &str,
    out: &mut Vec<BranchInfo>,
) -> Result<()> {
    let (branch_ver, branch_end) = r.read_version()?;
    let branch_end = branch_end
        .ok_or_else(|| RootError::Deserialization("TBranch missing byte count".into()))?;
    if branch_ver < MIN_BRANCH_VERSION {
        return Err(RootError::Unsupported(format!("TBranch version {}", branch_ver)));
    }

    let (name, title) = r.read_tnamed()?;

    // TAttFill
    r.skip_versioned()?;

    let compress_pos = r.pos();
    let compress = r.read_i32()?; // fCompress
    let _basket_size = r.read_i32()?; // fBasketSize
    let entry_offset_len = r.read_i32()?; // fEntryOffsetLen
    let write_basket = r.read_i32()?; // fWriteBasket (= number of valid baskets)
    let _entry_number = r.read_i64()?; // fEntryNumber

    if branch_ver >= 13 {
        r.skip_versioned()?; // fIOFeatures
    }

    let _offset = r.read_i32()?; // fOffset
    let max_baskets = r.read_i32()?; // fMaxBaskets
    let _split_level = r.read_i32()?; // fSplitLevel
    let entries = r.read_i64()?.max(0) as u64; // fEntries

    if branch_ver >= 11 {
        let _first_entry = r.read_i64()?; // fFirstEntry
    }

    let tot_bytes = r.read_i64()?; // fTotBytes
    let zip_bytes_pos = r.pos();
    let zip_bytes = r.read_i64()?; // fZipBytes

    if write_basket < 0 || max_baskets < write_basket {
        return Err(RootError::Deserialization(format!(
            "branch '{}': fWriteBasket={} fMaxBaskets={}",
            name, write_basket, max_baskets
        )));
    }
    let n_baskets = write_basket as usize;
    let max = max_baskets as usize;

    let mut subs = Vec::new();
    read_branch_array(r, refs, &mut subs)?;

    let leaves = read_leaf_array(r, refs)?;

    let embedded_baskets = count_embedded_baskets(r, refs)?;

    // Arrays of size fMaxBaskets behind a pointer flag; the first fWriteBasket
    // entries are valid (fWriteBasket + 1 for fBasketEntry).
    let (basket_bytes_pos, basket_bytes) = read_basic_array(r, max, 4, n_baskets, |r| {
        Ok(r.read_i32()? as u32 as u64)
    })?;
    let (_, basket_entry) =
        read_basic_array(r, max, 8, n_baskets + 1, |r| Ok(r.read_i64()?.max(0) as u64))?;
    let (basket_seek_pos, basket_seek) =
        read_basic_array(r, max, 8, n_baskets, |r| Ok(r.read_i64()?.max(0) as u64))?;

    if n_baskets > 0 && (basket_bytes_pos.is_none() || basket_seek_pos.is_none()) {
        return Err(RootError::Deserialization(format!(
            "branch '{}' has {} baskets but no basket arrays",
            name, n_baskets
        )));
    }

    r.set_pos(branch_end);

    out.push(BranchInfo {
        name,
        title,
        class_name: class_name.to_string(),
        leaves,
        compress,
        entries,
        entry_offset_len,
        tot_bytes,
        zip_bytes,
        basket_bytes: basket_bytes.into_iter().map(|v| v as u32).collect(),
        basket_entry,
        basket_seek,
        n_baskets,
        embedded_baskets,
        layout: BranchLayout { compress_pos, zip_bytes_pos, basket_bytes_pos, basket_seek_pos },
    });
    out.append(&mut subs);
    Ok(())
}

/// Read a `[fMaxBaskets]` pointer array: a u8 presence flag, then `max`
/// elements of `width` bytes. Keeps the first `keep` elements and returns the
/// position of the first element when present.
fn read_basic_array(
    r: &mut RBuffer,
    max: usize,
    width: usize,
    keep: usize,
    mut read: impl FnMut(&mut RBuffer) -> Result<u64>,
) -> Result<(Option<usize>, Vec<u64>)> {
    if r.read_u8()? == 0 {
        return Ok((None, Vec::new()));
    }
    let pos = r.pos();
    let mut values = Vec::with_capacity(keep.min(max));
    for i in 0..max {
        if i < keep {
            values.push(read(r)?);
        } else {
            r.skip(width)?;
        }
    }
    Ok((Some(pos), values))
}

/// Count the in-memory baskets serialized inside `fBaskets`.
fn count_embedded_baskets(r: &mut RBuffer, refs: &mut Refs) -> Result<usize> {
    let (count, arr_end) = read_tobjarray_header(r)?;
    let mut n = 0;
    for _ in 0..count {
        match refs.read_element(r)? {
            Element::Null => {}
            Element::Ref(_) => n += 1,
            Element::Object { end, .. } => {
                n += 1;
                r.set_pos(end);
            }
        }
    }
    r.set_pos(arr_end);
    Ok(n)
}

// ── TLeaf parsing ──────────────────────────────────────────────

/// Read a TObjArray of TLeaf objects.
fn read_leaf_array(r: &mut RBuffer, refs: &mut Refs) -> Result<Vec<LeafInfo>> {
    let (count, arr_end) = read_tobjarray_header(r)?;

    let mut leaves = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        match refs.read_element(r)? {
            Element::Null => {}
            Element::Ref(tag) => match refs.leaves.get(&tag) {
                Some(leaf) => leaves.push(leaf.clone()),
                None => log::debug!("leaf array holds a reference to object {}", tag),
            },
            Element::Object { class_name, tag, end } => {
                let leaf = read_leaf(r, refs, &class_name)?;
                refs.objects.insert(tag, leaf.name.clone());
                refs.leaves.insert(tag, leaf.clone());
                r.set_pos(end);
                leaves.push(leaf);
            }
        }
    }

    r.set_pos(arr_end);
    Ok(leaves)
}

/// Read a `TLeafX` object: its own version header, then the TLeaf base.
fn read_leaf(r: &mut RBuffer, refs: &mut Refs, class_name: &str) -> Result<LeafInfo> {
    if !class_name.starts_with("TLeaf") {
        return Err(RootError::UnsupportedClass(class_name.to_string()));
    }

    let (_ver, end) = r.read_version()?;
    let end = end
        .ok_or_else(|| RootError::Deserialization(format!("{} missing byte count", class_name)))?;

    // TLeaf
    let (_base_ver, _base_end) = r.read_version()?;
    let (name, title) = r.read_tnamed()?;
    let len = r.read_i32()?; // fLen
    let len_type = r.read_i32()?; // fLenType
    let _offset = r.read_i32()?; // fOffset
    let _is_range = r.read_u8()?; // fIsRange
    let is_unsigned = r.read_u8()? != 0; // fIsUnsigned

    // fLeafCount
    let count_leaf = match refs.read_element(r)? {
        Element::Null => None,
        Element::Ref(tag) => {
            let found = refs.objects.get(&tag).cloned();
            if found.is_none() {
                log::debug!("leaf '{}': unresolved count leaf reference {}", name, tag);
            }
            found
        }
        Element::Object { class_name, tag, end } => {
            let counter = read_leaf(r, refs, &class_name)?;
            refs.objects.insert(tag, counter.name.clone());
            refs.leaves.insert(tag, counter.clone());
            r.set_pos(end);
            Some(counter.name)
        }
    };

    r.set_pos(end);

    Ok(LeafInfo {
        leaf_type: LeafType::from_class(class_name, is_unsigned),
        name,
        title,
        class_name: class_name.to_string(),
        len,
        len_type,
        is_unsigned,
        count_leaf,
    })
}
