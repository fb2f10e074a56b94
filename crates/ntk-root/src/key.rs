//! TKey parsing and encoding: the record header ROOT uses to locate objects.

use crate::error::{Result, RootError};
use crate::rbuffer::RBuffer;
use crate::wbuffer::WBuffer;

/// Files (and records) beyond this offset need 64-bit seek pointers.
pub const K_START_BIG_FILE: u64 = 2_000_000_000;

/// TKey class version written for new keys (`+ 1000` for 64-bit seeks).
const KEY_VERSION: u16 = 4;

/// Byte offset of `fSeekKey` inside a key header.
pub(crate) const SEEK_KEY_OFFSET: usize = 18;

/// A parsed TKey record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    /// Total number of bytes in compressed object + key header.
    pub n_bytes: u32,
    /// Version of key class.
    pub version: u16,
    /// Uncompressed object length.
    pub obj_len: u32,
    /// Key creation time (ROOT datime).
    pub datime: u32,
    /// Length of the key header itself.
    pub key_len: u16,
    /// Cycle number (ROOT versioning within a directory).
    pub cycle: u16,
    /// Absolute position of this key in the file.
    pub seek_key: u64,
    /// Parent directory seek position.
    pub seek_pdir: u64,
    /// Class name of the stored object.
    pub class_name: String,
    /// Object name.
    pub name: String,
    /// Object title.
    pub title: String,
}

/// Public info about a key (for `list_keys()`).
#[derive(Debug, Clone)]
pub struct KeyInfo {
    /// Object name.
    pub name: String,
    /// Object class name (e.g. "TTree", "TDirectoryFile").
    pub class_name: String,
    /// Cycle number.
    pub cycle: u16,
}

impl KeyInfo {
    /// Create from an internal Key.
    pub fn from_key(key: &Key) -> Self {
        Self { name: key.name.clone(), class_name: key.class_name.clone(), cycle: key.cycle }
    }
}

impl Key {
    /// A fresh key header. Lengths and seeks are filled in by the writer.
    pub fn new(class_name: &str, name: &str, title: &str, large: bool) -> Self {
        let mut key = Key {
            n_bytes: 0,
            version: if large { KEY_VERSION + 1000 } else { KEY_VERSION },
            obj_len: 0,
            datime: 0,
            key_len: 0,
            cycle: 1,
            seek_key: 0,
            seek_pdir: 0,
            class_name: class_name.to_string(),
            name: name.to_string(),
            title: title.to_string(),
        };
        key.key_len = key.header_len() as u16;
        key
    }

    /// Read a TKey from the buffer at the current position.
    ///
    /// The seek width follows the key's own version: large files still hold
    /// 32-bit keys for records written before the 2 GB mark.
    pub fn read(r: &mut RBuffer) -> Result<Self> {
        let n_bytes = r.read_u32()?;
        let version = r.read_u16()?;
        let obj_len = r.read_u32()?;
        let datime = r.read_u32()?;
        let key_len = r.read_u16()?;
        let cycle = r.read_u16()?;

        let (seek_key, seek_pdir) = if version > 1000 {
            (r.read_u64()?, r.read_u64()?)
        } else {
            (r.read_u32()? as u64, r.read_u32()? as u64)
        };

        let class_name = r.read_string()?;
        let name = r.read_string()?;
        let title = r.read_string()?;

        Ok(Key {
            n_bytes,
            version,
            obj_len,
            datime,
            key_len,
            cycle,
            seek_key,
            seek_pdir,
            class_name,
            name,
            title,
        })
    }

    /// Whether this key stores 64-bit seek pointers.
    pub fn is_large(&self) -> bool {
        self.version > 1000
    }

    /// Whether the object bytes are stored without compression.
    pub fn is_uncompressed(&self) -> bool {
        self.n_bytes.saturating_sub(self.key_len as u32) == self.obj_len
    }

    /// Length of the encoded key header for the current strings and format.
    pub fn header_len(&self) -> usize {
        let seeks = if self.is_large() { 16 } else { 8 };
        SEEK_KEY_OFFSET
            + seeks
            + tstring_len(&self.class_name)
            + tstring_len(&self.name)
            + tstring_len(&self.title)
    }

    /// Encode the key header.
    pub fn write(&self, w: &mut WBuffer) {
        w.put_u32(self.n_bytes);
        w.put_u16(self.version);
        w.put_u32(self.obj_len);
        w.put_u32(self.datime);
        w.put_u16(self.key_len);
        w.put_u16(self.cycle);
        if self.is_large() {
            w.put_u64(self.seek_key);
            w.put_u64(self.seek_pdir);
        } else {
            w.put_u32(self.seek_key as u32);
            w.put_u32(self.seek_pdir as u32);
        }
        w.put_string(&self.class_name);
        w.put_string(&self.name);
        w.put_string(&self.title);
    }

    /// Encoded key header bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WBuffer::new(0);
        self.write(&mut w);
        w.into_inner()
    }
}

/// Relocate an encoded key header in place: new `fNbytes`, `fSeekKey` and
/// `fSeekPdir`. The header keeps its seek width, so a 32-bit key cannot move
/// past `i32::MAX`.
pub fn patch_header(raw: &mut [u8], n_bytes: u32, seek_key: u64, seek_pdir: u64) -> Result<()> {
    if raw.len() < SEEK_KEY_OFFSET + 8 {
        return Err(RootError::BufferUnderflow {
            offset: 0,
            need: SEEK_KEY_OFFSET + 8,
            have: raw.len(),
        });
    }
    let version = u16::from_be_bytes([raw[4], raw[5]]);
    raw[0..4].copy_from_slice(&n_bytes.to_be_bytes());

    let at = SEEK_KEY_OFFSET;
    if version > 1000 {
        if raw.len() < at + 16 {
            return Err(RootError::BufferUnderflow { offset: at, need: 16, have: raw.len() - at });
        }
        raw[at..at + 8].copy_from_slice(&seek_key.to_be_bytes());
        raw[at + 8..at + 16].copy_from_slice(&seek_pdir.to_be_bytes());
    } else {
        let small = |v: u64| {
            i32::try_from(v).map_err(|_| {
                RootError::Unsupported(format!("32-bit key cannot point to offset {}", v))
            })
        };
        raw[at..at + 4].copy_from_slice(&small(seek_key)?.to_be_bytes());
        raw[at + 4..at + 8].copy_from_slice(&small(seek_pdir)?.to_be_bytes());
    }
    Ok(())
}

/// Encoded length of a ROOT TString.
pub fn tstring_len(s: &str) -> usize {
    if s.len() < 255 { 1 + s.len() } else { 5 + s.len() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(large: bool) -> Key {
        let mut key = Key::new("TTree", "AnalysisTree", "events", large);
        key.n_bytes = 1234;
        key.obj_len = 4000;
        key.datime = 0x1234_5678;
        key.seek_key = 4096;
        key.seek_pdir = 100;
        key
    }

    #[test]
    fn small_key_round_trip() {
        let key = sample(false);
        let bytes = key.to_bytes();
        assert_eq!(bytes.len(), key.key_len as usize);
        let parsed = Key::read(&mut RBuffer::new(&bytes)).unwrap();
        assert_eq!(parsed, key);
        assert!(!parsed.is_large());
    }

    #[test]
    fn large_key_uses_64_bit_seeks() {
        let key = sample(true);
        assert_eq!(key.header_len(), sample(false).header_len() + 8);
        let parsed = Key::read(&mut RBuffer::new(&key.to_bytes())).unwrap();
        assert_eq!(parsed.seek_key, 4096);
        assert!(parsed.is_large());
    }

    #[test]
    fn patch_header_relocates_both_widths() {
        for large in [false, true] {
            let key = sample(large);
            let mut raw = key.to_bytes();
            patch_header(&mut raw, 999, 70_000, 100).unwrap();
            let parsed = Key::read(&mut RBuffer::new(&raw)).unwrap();
            assert_eq!((parsed.n_bytes, parsed.seek_key, parsed.seek_pdir), (999, 70_000, 100));
            assert_eq!(parsed.name, key.name);
        }
    }

    #[test]
    fn small_key_cannot_move_past_i32() {
        let mut raw = sample(false).to_bytes();
        let err = patch_header(&mut raw, 1, 3_000_000_000, 100);
        assert!(matches!(err, Err(RootError::Unsupported(_))));
    }

    #[test]
    fn uncompressed_detection() {
        let mut key = sample(false);
        key.n_bytes = key.key_len as u32 + key.obj_len;
        assert!(key.is_uncompressed());
    }
}
