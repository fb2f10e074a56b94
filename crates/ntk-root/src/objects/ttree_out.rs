//! TTree serialization for newly written trees.
//!
//! Produces the streamer layout ROOT 6 writes for `TTree` v20, `TBranch` v13
//! and `TLeafX` v1 (with `TLeaf` v2 base). Only flat branches with a single
//! numeric leaf are emitted.

use std::collections::HashMap;

use crate::tree::LeafType;
use crate::wbuffer::WBuffer;

const TTREE_VERSION: u16 = 20;
const TBRANCH_VERSION: u16 = 13;
const TOBJARRAY_VERSION: u16 = 3;
const TLIST_VERSION: u16 = 5;

/// Default `fBasketSize` of ROOT branches.
const BASKET_SIZE: i32 = 32_000;
/// Default `fDefaultEntryOffsetLen` of ROOT trees.
pub const DEFAULT_ENTRY_OFFSET_LEN: i32 = 1000;

/// `ROOT::TIOFeatures` as ROOT streams it: byte count 7, version 0 with the
/// class checksum, then an empty `fIOBits`.
const IO_FEATURES: [u8; 11] = [0x40, 0x00, 0x00, 0x07, 0x00, 0x00, 0x1a, 0xa1, 0x2f, 0x10, 0x00];

/// A leaf to serialize.
#[derive(Debug, Clone)]
pub struct LeafSpec {
    /// Leaf name.
    pub name: String,
    /// Element type.
    pub leaf_type: LeafType,
    /// Fixed elements per entry (`fLen`); 1 for scalars and counted arrays.
    pub len: i32,
    /// Counter leaf name for variable-length arrays.
    pub count_leaf: Option<String>,
    /// Set on counter leaves (`fIsRange`).
    pub is_range: bool,
    /// Largest value stored (`fMaximum`); ROOT sizes counted arrays from it.
    pub maximum: i64,
}

impl LeafSpec {
    /// Leaf title as ROOT builds it from the leaf list (`pt`, `p[3]`, `pt[n]`).
    pub fn title(&self) -> String {
        match &self.count_leaf {
            Some(count) => format!("{}[{}]", self.name, count),
            None if self.len > 1 => format!("{}[{}]", self.name, self.len),
            None => self.name.clone(),
        }
    }
}

/// A branch to serialize, with its basket bookkeeping.
#[derive(Debug, Clone)]
pub struct BranchSpec {
    /// Branch name.
    pub name: String,
    /// Branch title (leaf list, e.g. `pt[n]/F`).
    pub title: String,
    /// The single leaf of this branch.
    pub leaf: LeafSpec,
    /// 0 for fixed-size entries, otherwise the offset table length hint.
    pub entry_offset_len: i32,
    /// Entries written.
    pub entries: u64,
    /// Uncompressed bytes including basket key headers.
    pub tot_bytes: i64,
    /// Stored bytes including basket key headers.
    pub zip_bytes: i64,
    /// Stored size of each basket record.
    pub basket_bytes: Vec<u32>,
    /// First entry of each basket, followed by the total entry count.
    pub basket_entry: Vec<u64>,
    /// File position of each basket record.
    pub basket_seek: Vec<u64>,
}

/// A tree to serialize.
#[derive(Debug, Clone)]
pub struct TreeSpec {
    /// Tree name.
    pub name: String,
    /// Tree title.
    pub title: String,
    /// Entries written.
    pub entries: u64,
    /// Sum of branch `tot_bytes`.
    pub tot_bytes: i64,
    /// Sum of branch `zip_bytes`.
    pub zip_bytes: i64,
    /// Compression setting code stored in every branch.
    pub compress: i32,
    /// Branches in write order; counter branches precede their users.
    pub branches: Vec<BranchSpec>,
}

/// Serialize a TTree payload to be stored under a key of length `origin`.
pub fn write_ttree(spec: &TreeSpec, origin: usize) -> Vec<u8> {
    let mut w = WBuffer::new(origin);
    let tree_at = w.begin_version(TTREE_VERSION);

    w.put_tnamed(&spec.name, &spec.title);
    put_att_line(&mut w);
    put_att_fill(&mut w);
    put_att_marker(&mut w);

    w.put_i64(spec.entries as i64); // fEntries
    w.put_i64(spec.tot_bytes); // fTotBytes
    w.put_i64(spec.zip_bytes); // fZipBytes
    w.put_i64(spec.tot_bytes); // fSavedBytes
    w.put_i64(spec.zip_bytes); // fFlushedBytes
    w.put_f64(1.0); // fWeight
    w.put_i32(0); // fTimerInterval
    w.put_i32(25); // fScanField
    w.put_i32(0); // fUpdate
    w.put_i32(DEFAULT_ENTRY_OFFSET_LEN); // fDefaultEntryOffsetLen
    w.put_i32(0); // fNClusterRange
    w.put_i64(1_000_000_000_000); // fMaxEntries
    w.put_i64(1_000_000_000_000); // fMaxEntryLoop
    w.put_i64(0); // fMaxVirtualSize
    w.put_i64(-300_000_000); // fAutoSave
    w.put_i64(-30_000_000); // fAutoFlush
    w.put_i64(1_000_000); // fEstimate
    w.put_u8(0); // fClusterRangeEnd
    w.put_u8(0); // fClusterSize
    w.put_bytes(&IO_FEATURES);

    // fBranches
    let mut leaf_tags: HashMap<String, u32> = HashMap::new();
    let mut leaf_order = Vec::with_capacity(spec.branches.len());
    let arr = begin_tobjarray(&mut w, spec.branches.len());
    for branch in &spec.branches {
        let at = w.begin_object("TBranch");
        put_tbranch(&mut w, branch, spec.compress, &mut leaf_tags);
        w.end_object(at);
        if let Some(&tag) = leaf_tags.get(&branch.leaf.name) {
            leaf_order.push(tag);
        }
    }
    w.end_version(arr);

    // fLeaves: references to the leaves streamed inside the branches
    let arr = begin_tobjarray(&mut w, leaf_order.len());
    for tag in leaf_order {
        w.put_u32(tag);
    }
    w.end_version(arr);

    // fAliases, fIndexValues, fIndex, fTreeIndex, fFriends, fUserInfo, fBranchRef
    for _ in 0..7 {
        w.put_u32(0);
    }

    w.end_version(tree_at);
    w.into_inner()
}

/// Serialize an empty `TList` (the StreamerInfo record of files whose
/// classes are all built into ROOT).
pub fn write_empty_tlist(origin: usize) -> Vec<u8> {
    let mut w = WBuffer::new(origin);
    let at = w.begin_version(TLIST_VERSION);
    w.put_tobject();
    w.put_string("");
    w.put_i32(0);
    w.end_version(at);
    w.into_inner()
}

fn put_tbranch(
    w: &mut WBuffer,
    b: &BranchSpec,
    compress: i32,
    leaf_tags: &mut HashMap<String, u32>,
) {
    let n_baskets = b.basket_seek.len();
    let max_baskets = n_baskets + 1;

    let at = w.begin_version(TBRANCH_VERSION);
    w.put_tnamed(&b.name, &b.title);
    put_att_fill(w);

    w.put_i32(compress); // fCompress
    w.put_i32(BASKET_SIZE); // fBasketSize
    w.put_i32(b.entry_offset_len); // fEntryOffsetLen
    w.put_i32(n_baskets as i32); // fWriteBasket
    w.put_i64(b.entries as i64); // fEntryNumber
    w.put_bytes(&IO_FEATURES);
    w.put_i32(0); // fOffset
    w.put_i32(max_baskets as i32); // fMaxBaskets
    w.put_i32(0); // fSplitLevel
    w.put_i64(b.entries as i64); // fEntries
    w.put_i64(0); // fFirstEntry
    w.put_i64(b.tot_bytes); // fTotBytes
    w.put_i64(b.zip_bytes); // fZipBytes

    // fBranches
    let arr = begin_tobjarray(w, 0);
    w.end_version(arr);

    // fLeaves
    let arr = begin_tobjarray(w, 1);
    let leaf_at = w.begin_object(b.leaf.leaf_type.class_name());
    put_tleaf(w, &b.leaf, leaf_tags);
    w.end_object(leaf_at);
    let tag = w.object_tag(leaf_at);
    leaf_tags.insert(b.leaf.name.clone(), tag);
    w.end_version(arr);

    // fBaskets
    let arr = begin_tobjarray(w, 0);
    w.end_version(arr);

    w.put_u8(1); // fBasketBytes
    for i in 0..max_baskets {
        w.put_i32(b.basket_bytes.get(i).copied().unwrap_or(0) as i32);
    }
    w.put_u8(1); // fBasketEntry
    for i in 0..max_baskets {
        w.put_i64(b.basket_entry.get(i).copied().unwrap_or(0) as i64);
    }
    w.put_u8(1); // fBasketSeek
    for i in 0..max_baskets {
        w.put_i64(b.basket_seek.get(i).copied().unwrap_or(0) as i64);
    }
    w.put_string(""); // fFileName

    w.end_version(at);
}

fn put_tleaf(w: &mut WBuffer, leaf: &LeafSpec, leaf_tags: &HashMap<String, u32>) {
    let at = w.begin_version(1);

    let base = w.begin_version(2);
    w.put_tnamed(&leaf.name, &leaf.title());
    w.put_i32(leaf.len); // fLen
    w.put_i32(leaf.leaf_type.byte_size() as i32); // fLenType
    w.put_i32(0); // fOffset
    w.put_u8(leaf.is_range as u8); // fIsRange
    w.put_u8(leaf.leaf_type.is_unsigned() as u8); // fIsUnsigned
    match leaf.count_leaf.as_ref().and_then(|name| leaf_tags.get(name)) {
        Some(&tag) => w.put_u32(tag),
        None => w.put_null(),
    }
    w.end_version(base);

    put_typed(w, leaf.leaf_type, 0); // fMinimum
    put_typed(w, leaf.leaf_type, leaf.maximum); // fMaximum

    w.end_version(at);
}

fn put_typed(w: &mut WBuffer, leaf_type: LeafType, v: i64) {
    match leaf_type {
        LeafType::F32 => w.put_f32(v as f32),
        LeafType::F64 => w.put_f64(v as f64),
        LeafType::I32 | LeafType::U32 => w.put_i32(v as i32),
        LeafType::I64 | LeafType::U64 => w.put_i64(v),
        LeafType::I16 | LeafType::U16 => w.put_i16(v as i16),
        LeafType::I8 | LeafType::U8 | LeafType::Bool => w.put_u8(v as u8),
    }
}

fn begin_tobjarray(w: &mut WBuffer, count: usize) -> usize {
    let at = w.begin_version(TOBJARRAY_VERSION);
    w.put_tobject();
    w.put_string("");
    w.put_i32(count as i32);
    w.put_i32(0); // fLowerBound
    at
}

fn put_att_line(w: &mut WBuffer) {
    let at = w.begin_version(2);
    w.put_i16(1); // fLineColor
    w.put_i16(1); // fLineStyle
    w.put_i16(1); // fLineWidth
    w.end_version(at);
}

fn put_att_fill(w: &mut WBuffer) {
    let at = w.begin_version(2);
    w.put_i16(0); // fFillColor
    w.put_i16(1001); // fFillStyle
    w.end_version(at);
}

fn put_att_marker(w: &mut WBuffer) {
    let at = w.begin_version(2);
    w.put_i16(1); // fMarkerColor
    w.put_i16(1); // fMarkerStyle
    w.put_f32(1.0); // fMarkerSize
    w.end_version(at);
}
