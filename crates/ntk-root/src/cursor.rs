//! Entry-by-entry traversal of a TTree and the two ways of counting entries.
//!
//! [`EntryCursor`] moves through every branch in lockstep, decompressing a
//! basket when the cursor enters it, so a full pass touches every stored
//! byte of the tree. That is what makes the slow count a real check of the
//! stored data and not a restatement of the cached `fEntries`.

use crate::basket::Basket;
use crate::error::{Result, RootError};
use crate::file::RootFile;
use crate::tree::{BranchInfo, Tree};

/// One branch's position inside its basket sequence.
struct Column<'a> {
    branch: &'a BranchInfo,
    next_basket: usize,
    basket: Option<Basket>,
    /// Next entry inside `basket`.
    local: usize,
}

impl<'a> Column<'a> {
    fn new(branch: &'a BranchInfo) -> Self {
        Self { branch, next_basket: 0, basket: None, local: 0 }
    }

    /// Step to `entry`, loading the following basket when the current one is
    /// used up.
    fn advance(&mut self, file_data: &[u8], entry: u64) -> Result<()> {
        let exhausted = match &self.basket {
            Some(b) => self.local >= b.n_entries(),
            None => true,
        };
        if exhausted {
            self.load_basket(file_data, entry)?;
        }
        self.local += 1;
        Ok(())
    }

    fn load_basket(&mut self, file_data: &[u8], entry: u64) -> Result<()> {
        let name = &self.branch.name;
        loop {
            let idx = self.next_basket;
            if idx >= self.branch.n_baskets {
                return Err(RootError::EntryMismatch(format!(
                    "branch '{}' has no basket for entry {}",
                    name, entry
                )));
            }
            let (first, last) = self.branch.basket_range(idx).ok_or_else(|| {
                RootError::Deserialization(format!("branch '{}': no range for basket {}", name, idx))
            })?;
            if first != entry {
                return Err(RootError::EntryMismatch(format!(
                    "branch '{}' basket {} starts at entry {}, expected {}",
                    name, idx, first, entry
                )));
            }
            self.next_basket += 1;
            if last == first {
                continue;
            }

            let basket = Basket::read(file_data, self.branch.basket_seek[idx])?;
            let span = last.saturating_sub(first);
            if basket.n_entries() as u64 != span {
                return Err(RootError::EntryMismatch(format!(
                    "branch '{}' basket {} holds {} entries, index says {}",
                    name,
                    idx,
                    basket.n_entries(),
                    span
                )));
            }
            log::trace!("branch '{}': basket {} covers entries {}..{}", name, idx, first, last);
            self.basket = Some(basket);
            self.local = 0;
            return Ok(());
        }
    }

    fn current(&self) -> Option<&[u8]> {
        self.basket.as_ref()?.entry(self.local.checked_sub(1)?)
    }
}

/// A cursor over the entries of a tree, all branches at once.
pub struct EntryCursor<'a> {
    file_data: &'a [u8],
    columns: Vec<Column<'a>>,
    /// Entries visited so far.
    position: u64,
    /// Entries stored in on-disk baskets.
    total: u64,
}

impl<'a> EntryCursor<'a> {
    /// Prepare a pass over `tree`, whose baskets live in `file_data`.
    ///
    /// Every branch with on-disk baskets takes part. The branches must agree
    /// on where the tree ends, and that end must match `fEntries`: entries
    /// held only in embedded baskets cannot be visited.
    pub fn new(file_data: &'a [u8], tree: &'a Tree) -> Result<Self> {
        let columns: Vec<Column<'a>> =
            tree.branches.iter().filter(|b| b.n_baskets > 0).map(Column::new).collect();

        if columns.is_empty() {
            if tree.entries == 0 {
                return Ok(Self { file_data, columns, position: 0, total: 0 });
            }
            return Err(RootError::Unsupported(format!(
                "tree '{}' claims {} entries but has no baskets on disk",
                tree.name, tree.entries
            )));
        }

        let mut total = None;
        for col in &columns {
            let b = col.branch;
            let end = b.basket_entry.get(b.n_baskets).copied().ok_or_else(|| {
                RootError::Deserialization(format!("branch '{}': basket index truncated", b.name))
            })?;
            match total {
                None => total = Some(end),
                Some(t) if t != end => {
                    return Err(RootError::EntryMismatch(format!(
                        "branch '{}' ends at entry {}, others at {}",
                        b.name, end, t
                    )));
                }
                Some(_) => {}
            }
            if b.embedded_baskets > 0 || b.entries != end {
                return Err(RootError::Unsupported(format!(
                    "branch '{}': {} of {} entries are on disk, the rest sit in baskets \
                     embedded in the tree record; only the cached entry count is available",
                    b.name, end, b.entries
                )));
            }
        }
        let total = total.unwrap_or(0);

        if total != tree.entries {
            return Err(RootError::EntryMismatch(format!(
                "tree '{}': baskets hold {} entries, fEntries is {}",
                tree.name, total, tree.entries
            )));
        }

        Ok(Self { file_data, columns, position: 0, total })
    }

    /// Move to the next entry. Returns `false` once all entries were visited.
    pub fn advance(&mut self) -> Result<bool> {
        if self.position >= self.total {
            return Ok(false);
        }
        for col in &mut self.columns {
            col.advance(self.file_data, self.position)?;
        }
        self.position += 1;
        Ok(true)
    }

    /// Number of entries visited so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes of the current entry in branch `name`.
    pub fn value(&self, name: &str) -> Option<&[u8]> {
        self.columns.iter().find(|c| c.branch.name == name)?.current()
    }
}

/// Entry count cached in the tree metadata (`fEntries`).
pub fn count_entries_fast(file: &RootFile, tree_name: &str) -> Result<u64> {
    Ok(file.get_tree(tree_name)?.entries)
}

/// Entry count obtained by visiting every entry.
pub fn count_entries_slow(file: &RootFile, tree_name: &str) -> Result<u64> {
    visit_entries(file, &file.get_tree(tree_name)?)
}

/// Visit every entry of an already parsed `tree` of `file`; returns how many
/// there were.
pub fn visit_entries(file: &RootFile, tree: &Tree) -> Result<u64> {
    let mut cursor = EntryCursor::new(file.file_data(), tree)?;
    while cursor.advance()? {}
    log::debug!("visited {} entries of '{}'", cursor.position(), tree.name);
    Ok(cursor.position())
}
