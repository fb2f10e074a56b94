//! TDirectory parsing, encoding and key-list navigation.

use crate::error::Result;
use crate::key::Key;
use crate::rbuffer::RBuffer;
use crate::wbuffer::WBuffer;

/// TDirectory class version written for new directories (`+ 1000` when large).
const DIRECTORY_VERSION: u16 = 5;

/// Encoded size of a directory record. Small records are padded so they can
/// be rewritten in the large format in place.
pub const DIRECTORY_RECORD_LEN: usize = 60;

/// A parsed TDirectory: an ordered list of TKeys.
#[derive(Debug, Clone)]
pub struct Directory {
    keys: Vec<Key>,
}

impl Directory {
    /// Read the key list from the file at `seek_keys`.
    ///
    /// The key list starts with a TKey header for the list itself, then
    /// a u32 `nkeys`, followed by `nkeys` TKey records.
    pub fn read_key_list(file_data: &[u8], seek_keys: usize) -> Result<Self> {
        let mut r = RBuffer::new(file_data);
        r.set_pos(seek_keys);

        // The key-list itself is stored as a TKey; skip its header.
        let _list_key = Key::read(&mut r)?;

        let nkeys = r.read_u32()? as usize;

        let mut keys = Vec::with_capacity(nkeys.min(r.remaining()));
        for _ in 0..nkeys {
            keys.push(Key::read(&mut r)?);
        }

        Ok(Directory { keys })
    }

    /// Access the list of keys.
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Find a key by name (highest cycle wins).
    pub fn find_key(&self, name: &str) -> Option<&Key> {
        self.keys.iter().filter(|k| k.name == name).max_by_key(|k| k.cycle)
    }
}

/// The TDirectory streamer record stored after the file's name record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    /// Creation time (ROOT datime).
    pub datime_c: u32,
    /// Modification time (ROOT datime).
    pub datime_m: u32,
    /// Size of the key-list record.
    pub nbytes_keys: u32,
    /// Size of the name record (key header + TNamed strings).
    pub nbytes_name: u32,
    /// Position of this directory's name record.
    pub seek_dir: u64,
    /// Position of the parent directory (0 for the top directory).
    pub seek_parent: u64,
    /// Position of the key-list record.
    pub seek_keys: u64,
    /// Directory UUID.
    pub uuid: [u8; 16],
}

impl DirectoryRecord {
    /// Parse a directory record at the reader's position.
    pub fn read(r: &mut RBuffer) -> Result<Self> {
        let version = r.read_u16()?;
        let datime_c = r.read_u32()?;
        let datime_m = r.read_u32()?;
        let nbytes_keys = r.read_u32()?;
        let nbytes_name = r.read_u32()?;

        let (seek_dir, seek_parent, seek_keys) = if version > 1000 {
            (r.read_u64()?, r.read_u64()?, r.read_u64()?)
        } else {
            (r.read_u32()? as u64, r.read_u32()? as u64, r.read_u32()? as u64)
        };

        // Old files end the record before the UUID.
        let mut uuid = [0u8; 16];
        if r.remaining() >= 18 {
            let _uuid_version = r.read_u16()?;
            uuid.copy_from_slice(r.read_bytes(16)?);
        }

        Ok(Self { datime_c, datime_m, nbytes_keys, nbytes_name, seek_dir, seek_parent, seek_keys, uuid })
    }

    /// Encode the record, always [`DIRECTORY_RECORD_LEN`] bytes long.
    pub fn write(&self, w: &mut WBuffer, large: bool) {
        let start = w.pos();
        w.put_u16(if large { DIRECTORY_VERSION + 1000 } else { DIRECTORY_VERSION });
        w.put_u32(self.datime_c);
        w.put_u32(self.datime_m);
        w.put_u32(self.nbytes_keys);
        w.put_u32(self.nbytes_name);
        if large {
            w.put_u64(self.seek_dir);
            w.put_u64(self.seek_parent);
            w.put_u64(self.seek_keys);
        } else {
            w.put_u32(self.seek_dir as u32);
            w.put_u32(self.seek_parent as u32);
            w.put_u32(self.seek_keys as u32);
        }
        w.put_u16(1);
        w.put_bytes(&self.uuid);
        while w.pos() - start < DIRECTORY_RECORD_LEN {
            w.put_u8(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> DirectoryRecord {
        DirectoryRecord {
            datime_c: 1,
            datime_m: 2,
            nbytes_keys: 300,
            nbytes_name: 58,
            seek_dir: 100,
            seek_parent: 0,
            seek_keys: 9_000,
            uuid: [7; 16],
        }
    }

    #[test]
    fn record_round_trip_small_and_large() {
        for large in [false, true] {
            let mut w = WBuffer::new(0);
            record().write(&mut w, large);
            let bytes = w.into_inner();
            assert_eq!(bytes.len(), DIRECTORY_RECORD_LEN);
            let parsed = DirectoryRecord::read(&mut RBuffer::new(&bytes)).unwrap();
            assert_eq!(parsed, record());
        }
    }

    #[test]
    fn find_key_prefers_highest_cycle() {
        let mut a = Key::new("TTree", "AnalysisTree", "", false);
        a.cycle = 1;
        let mut b = a.clone();
        b.cycle = 2;
        let dir = Directory { keys: vec![b.clone(), a] };
        assert_eq!(dir.find_key("AnalysisTree").unwrap().cycle, 2);
        assert!(dir.find_key("analysistree").is_none());
    }
}
