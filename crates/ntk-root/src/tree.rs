//! Public types for TTree branch metadata.

/// Leaf data type (maps to ROOT TLeaf class names).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafType {
    /// `TLeafF`: 32-bit float.
    F32,
    /// `TLeafD`: 64-bit float.
    F64,
    /// `TLeafI`: 32-bit signed integer.
    I32,
    /// `TLeafL`: 64-bit signed integer.
    I64,
    /// `TLeafI` unsigned variant.
    U32,
    /// `TLeafL` unsigned variant.
    U64,
    /// `TLeafS`: 16-bit signed integer.
    I16,
    /// `TLeafS` unsigned variant.
    U16,
    /// `TLeafB`: 8-bit signed integer.
    I8,
    /// `TLeafB` unsigned variant.
    U8,
    /// `TLeafO`: boolean (1 byte).
    Bool,
}

impl LeafType {
    /// Size in bytes of one element.
    pub fn byte_size(self) -> usize {
        match self {
            LeafType::F32 | LeafType::I32 | LeafType::U32 => 4,
            LeafType::F64 | LeafType::I64 | LeafType::U64 => 8,
            LeafType::I16 | LeafType::U16 => 2,
            LeafType::I8 | LeafType::U8 | LeafType::Bool => 1,
        }
    }

    /// Map a TLeaf class name (plus its `fIsUnsigned` flag) to a leaf type.
    pub fn from_class(class_name: &str, is_unsigned: bool) -> Option<Self> {
        let lt = match (class_name, is_unsigned) {
            ("TLeafF", _) => LeafType::F32,
            ("TLeafD", _) => LeafType::F64,
            ("TLeafO", _) => LeafType::Bool,
            ("TLeafI", false) => LeafType::I32,
            ("TLeafI", true) => LeafType::U32,
            ("TLeafL", false) => LeafType::I64,
            ("TLeafL", true) => LeafType::U64,
            ("TLeafS", false) => LeafType::I16,
            ("TLeafS", true) => LeafType::U16,
            ("TLeafB", false) => LeafType::I8,
            ("TLeafB", true) => LeafType::U8,
            _ => return None,
        };
        Some(lt)
    }

    /// ROOT class used to store this type.
    pub fn class_name(self) -> &'static str {
        match self {
            LeafType::F32 => "TLeafF",
            LeafType::F64 => "TLeafD",
            LeafType::I32 | LeafType::U32 => "TLeafI",
            LeafType::I64 | LeafType::U64 => "TLeafL",
            LeafType::I16 | LeafType::U16 => "TLeafS",
            LeafType::I8 | LeafType::U8 => "TLeafB",
            LeafType::Bool => "TLeafO",
        }
    }

    /// Type code used in branch leaf lists (`"pt/F"`, `"n/i"`, ...).
    pub fn type_code(self) -> char {
        match self {
            LeafType::F32 => 'F',
            LeafType::F64 => 'D',
            LeafType::I32 => 'I',
            LeafType::U32 => 'i',
            LeafType::I64 => 'L',
            LeafType::U64 => 'l',
            LeafType::I16 => 'S',
            LeafType::U16 => 's',
            LeafType::I8 => 'B',
            LeafType::U8 => 'b',
            LeafType::Bool => 'O',
        }
    }

    /// Whether the type is one of the unsigned integer variants.
    pub fn is_unsigned(self) -> bool {
        matches!(self, LeafType::U8 | LeafType::U16 | LeafType::U32 | LeafType::U64)
    }
}

/// Metadata for a single TLeaf.
#[derive(Debug, Clone)]
pub struct LeafInfo {
    /// Leaf name.
    pub name: String,
    /// Leaf title (leaf-list fragment, e.g. `"pt[nJet]"`).
    pub title: String,
    /// Stored class (`TLeafF`, `TLeafElement`, ...).
    pub class_name: String,
    /// Element type, when the class is a plain numeric leaf.
    pub leaf_type: Option<LeafType>,
    /// Fixed number of elements per entry (`fLen`).
    pub len: i32,
    /// Element size in bytes (`fLenType`).
    pub len_type: i32,
    /// `fIsUnsigned`.
    pub is_unsigned: bool,
    /// Name of the leaf holding this leaf's per-entry element count.
    pub count_leaf: Option<String>,
}

/// Byte positions inside the decompressed TTree payload where a branch
/// stores values that change when its baskets are rewritten.
#[derive(Debug, Clone, Default)]
pub struct BranchLayout {
    /// `fCompress` (i32).
    pub compress_pos: usize,
    /// `fZipBytes` (i64).
    pub zip_bytes_pos: usize,
    /// First element of `fBasketBytes` (i32 array), if the array is stored.
    pub basket_bytes_pos: Option<usize>,
    /// First element of `fBasketSeek` (i64 array), if the array is stored.
    pub basket_seek_pos: Option<usize>,
}

/// Metadata for a single TBranch in a TTree.
#[derive(Debug, Clone)]
pub struct BranchInfo {
    /// Branch name.
    pub name: String,
    /// Branch title (the leaf list for simple branches).
    pub title: String,
    /// Stored class (`TBranch`, `TBranchElement`, ...).
    pub class_name: String,
    /// Leaves of this branch.
    pub leaves: Vec<LeafInfo>,
    /// Compression setting code (`fCompress`).
    pub compress: i32,
    /// Total number of entries in this branch.
    pub entries: u64,
    /// `fEntryOffsetLen`: non-zero when entries have variable size.
    pub entry_offset_len: i32,
    /// Uncompressed bytes (`fTotBytes`).
    pub tot_bytes: i64,
    /// Compressed bytes (`fZipBytes`).
    pub zip_bytes: i64,
    /// Compressed byte sizes for each basket.
    pub basket_bytes: Vec<u32>,
    /// Entry boundaries for each basket (`n_baskets + 1` values).
    pub basket_entry: Vec<u64>,
    /// Absolute file offsets (seek positions) for each basket.
    pub basket_seek: Vec<u64>,
    /// Number of valid baskets (`fWriteBasket`).
    pub n_baskets: usize,
    /// Baskets stored inside the TTree record instead of on their own key.
    pub embedded_baskets: usize,
    /// Patch positions inside the TTree payload.
    pub layout: BranchLayout,
}

impl BranchInfo {
    /// Data type of the first leaf.
    pub fn leaf_type(&self) -> Option<LeafType> {
        self.leaves.first().and_then(|l| l.leaf_type)
    }

    /// Entry span `[first, last)` of basket `i`.
    pub fn basket_range(&self, i: usize) -> Option<(u64, u64)> {
        let first = *self.basket_entry.get(i)?;
        let last = *self.basket_entry.get(i + 1)?;
        Some((first, last))
    }
}

/// Patch positions inside the decompressed TTree payload.
#[derive(Debug, Clone, Default)]
pub struct TreeLayout {
    /// The tree's `fZipBytes` (i64).
    pub zip_bytes_pos: usize,
    /// Branch arrays referenced an already-streamed branch instead of
    /// holding it inline.
    pub has_branch_refs: bool,
}

/// A parsed TTree with branch metadata.
#[derive(Debug, Clone)]
pub struct Tree {
    /// Tree name.
    pub name: String,
    /// Tree title.
    pub title: String,
    /// Total number of entries (`fEntries`).
    pub entries: u64,
    /// Uncompressed bytes (`fTotBytes`).
    pub tot_bytes: i64,
    /// Compressed bytes (`fZipBytes`).
    pub zip_bytes: i64,
    /// Flat list of all branches (including sub-branches, parents first).
    pub branches: Vec<BranchInfo>,
    /// Patch positions inside the TTree payload.
    pub layout: TreeLayout,
}

impl Tree {
    /// Find a branch by name.
    pub fn find_branch(&self, name: &str) -> Option<&BranchInfo> {
        self.branches.iter().find(|b| b.name == name)
    }

    /// List all branch names.
    pub fn branch_names(&self) -> Vec<&str> {
        self.branches.iter().map(|b| b.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_flag_selects_variant() {
        assert_eq!(LeafType::from_class("TLeafI", false), Some(LeafType::I32));
        assert_eq!(LeafType::from_class("TLeafI", true), Some(LeafType::U32));
        assert_eq!(LeafType::from_class("TLeafB", true), Some(LeafType::U8));
        assert_eq!(LeafType::from_class("TLeafElement", false), None);
    }

    #[test]
    fn class_and_code_agree() {
        for lt in [LeafType::F32, LeafType::U16, LeafType::I64, LeafType::Bool] {
            assert_eq!(LeafType::from_class(lt.class_name(), lt.is_unsigned()), Some(lt));
        }
        assert_eq!(LeafType::U32.type_code(), 'i');
        assert_eq!(LeafType::F64.byte_size(), 8);
    }
}
