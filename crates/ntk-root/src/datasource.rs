//! The bytes of an opened file and bounds-checked views into them.

use std::fs;
use std::ops::Deref;
use std::path::Path;

use crate::error::{Result, RootError};

/// Contents of a ROOT file, mapped from disk or held in memory.
pub enum FileBytes {
    /// Read-only memory map of the file.
    Mapped(memmap2::Mmap),
    /// Bytes handed over by the caller, or an empty file.
    Owned(Vec<u8>),
}

impl FileBytes {
    /// Map `path` read-only.
    ///
    /// Empty files are not mapped; they fail later as a bad header.
    pub fn map(path: &Path) -> Result<Self> {
        let file = fs::File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(FileBytes::Owned(Vec::new()));
        }
        // SAFETY: the mapping is read-only; a file changed underneath a
        // running tool is outside its contract.
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        Ok(FileBytes::Mapped(mmap))
    }

    /// Whether the bytes come from a memory map.
    pub fn is_mapped(&self) -> bool {
        matches!(self, FileBytes::Mapped(_))
    }
}

impl Deref for FileBytes {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        match self {
            FileBytes::Mapped(m) => m,
            FileBytes::Owned(v) => v,
        }
    }
}

/// The `len` bytes at `offset`, or [`RootError::BufferUnderflow`].
pub fn record(data: &[u8], offset: u64, len: usize) -> Result<&[u8]> {
    let start = usize::try_from(offset).unwrap_or(usize::MAX);
    let have = data.len().saturating_sub(start);
    if start > data.len() || have < len {
        return Err(RootError::BufferUnderflow { offset: start, need: len, have });
    }
    Ok(&data[start..start + len])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_checks_bounds() {
        let data = [1u8, 2, 3, 4, 5];
        assert_eq!(record(&data, 1, 3).unwrap(), &[2, 3, 4]);
        assert_eq!(record(&data, 5, 0).unwrap(), &[] as &[u8]);
        assert!(matches!(
            record(&data, 3, 4),
            Err(RootError::BufferUnderflow { offset: 3, need: 4, have: 2 })
        ));
        assert!(record(&data, u64::MAX, 1).is_err());
    }

    #[test]
    fn empty_file_is_not_mapped() {
        let path = std::env::temp_dir().join(format!("ntk-root-empty-{}.root", std::process::id()));
        fs::write(&path, b"").unwrap();
        let bytes = FileBytes::map(&path).unwrap();
        assert!(!bytes.is_mapped());
        assert!(bytes.is_empty());
        fs::remove_file(&path).unwrap();
    }
}
