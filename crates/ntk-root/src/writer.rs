//! Writing ROOT files.
//!
//! [`RootWriter`] creates (or truncates) a file and appends keyed records
//! after the fixed preamble at `fBEGIN = 100`. Closing it writes the
//! StreamerInfo list if none was supplied, the top directory's key list and
//! the free-segments record, then rewrites the preamble with the final
//! header and directory.
//!
//! ```text
//! 0    file header (padded to fBEGIN)
//! 100  name record: TKey "TFile" + fName + fTitle
//!      TDirectory record (60 bytes)
//!      ... keyed records ...
//!      key list, free segments          (fEND)
//! ```

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{Datelike, Timelike};

use crate::compress::CompressionSetting;
use crate::directory::{DIRECTORY_RECORD_LEN, DirectoryRecord};
use crate::error::{Result, RootError};
use crate::file::{FileHeader, STREAMER_INFO_NAME};
use crate::key::{K_START_BIG_FILE, Key, tstring_len};
use crate::objects::write_empty_tlist;
use crate::wbuffer::WBuffer;

/// ROOT release recorded in `fVersion` (6.30/06).
pub const ROOT_VERSION: u32 = 63006;

/// Offset of the first record.
pub const BEGIN: u64 = 100;

/// TFree class version (`+ 1000` for 64-bit segment bounds).
const FREE_VERSION: u16 = 1;

/// Upper bound of the trailing free segment once a file outgrows 32 bits.
const BIG_FILE_LAST_FREE: u64 = 2_000_000_000_000;

/// A ROOT file being written.
pub struct RootWriter {
    file: BufWriter<File>,
    path: PathBuf,
    setting: CompressionSetting,
    name: String,
    title: String,
    datime: u32,
    uuid: [u8; 16],
    nbytes_name: u32,
    end: u64,
    keys: Vec<Key>,
    streamer_info: Option<Key>,
}

impl RootWriter {
    /// Create `path`, replacing any existing file (ROOT's `RECREATE`).
    ///
    /// Objects written through this writer are compressed with `setting`.
    pub fn create(path: impl AsRef<Path>, setting: CompressionSetting) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;

        let name = path.to_string_lossy().into_owned();
        let title = String::new();
        let name_key = Key::new("TFile", &name, &title, false);
        let nbytes_name = (name_key.key_len as usize + tstring_len(&name) + tstring_len(&title)) as u32;

        let mut writer = Self {
            file: BufWriter::new(file),
            path,
            setting,
            name,
            title,
            datime: datime_now(),
            uuid: uuid::Uuid::new_v4().into_bytes(),
            nbytes_name,
            end: BEGIN + nbytes_name as u64 + DIRECTORY_RECORD_LEN as u64,
            keys: Vec::new(),
            streamer_info: None,
        };

        let preamble = writer.preamble(&Trailer::default());
        writer.file.write_all(&preamble)?;
        log::debug!("created {} (compression {})", writer.path.display(), setting);
        Ok(writer)
    }

    /// Compression applied to written objects.
    pub fn setting(&self) -> CompressionSetting {
        self.setting
    }

    /// Path being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current end of file: where the next record lands.
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Whether new keys need 64-bit seek pointers.
    pub fn needs_large_keys(&self) -> bool {
        self.end > K_START_BIG_FILE
    }

    /// ROOT datime stamped on records of this file.
    pub fn datime(&self) -> u32 {
        self.datime
    }

    /// A key header for an object to be stored in the top directory.
    ///
    /// Serialize the object with the returned key's `key_len` as origin, then
    /// hand both to [`write_object`](Self::write_object).
    pub fn new_key(&self, class_name: &str, name: &str, title: &str) -> Key {
        let mut key = Key::new(class_name, name, title, self.needs_large_keys());
        key.datime = self.datime;
        key
    }

    /// Compress `payload` with the file's setting, store it under `key` and
    /// register the key in the top directory. Returns the final key.
    pub fn write_object(&mut self, mut key: Key, payload: &[u8]) -> Result<Key> {
        key.cycle = self.keys.iter().filter(|k| k.name == key.name).map(|k| k.cycle).max().unwrap_or(0) + 1;
        self.put_keyed(&mut key, payload)?;
        self.keys.push(key.clone());
        Ok(key)
    }

    /// Store the StreamerInfo list (not listed in the directory).
    pub fn write_streamer_info(&mut self, mut key: Key, payload: &[u8]) -> Result<()> {
        if key.name != STREAMER_INFO_NAME {
            return Err(RootError::Unsupported(format!(
                "StreamerInfo record named '{}'",
                key.name
            )));
        }
        self.put_keyed(&mut key, payload)?;
        self.streamer_info = Some(key);
        Ok(())
    }

    /// Append an already encoded record; returns its position.
    pub fn write_raw(&mut self, record: &[u8]) -> Result<u64> {
        let seek = self.end;
        self.file.write_all(record)?;
        self.end += record.len() as u64;
        Ok(seek)
    }

    fn put_keyed(&mut self, key: &mut Key, payload: &[u8]) -> Result<()> {
        let compressed = self.setting.compress(payload)?;
        let stored = compressed.as_deref().unwrap_or(payload);

        key.obj_len = payload.len() as u32;
        key.n_bytes = key.key_len as u32 + stored.len() as u32;
        key.seek_key = self.end;
        key.seek_pdir = BEGIN;
        if !key.is_large() && self.end > i32::MAX as u64 {
            return Err(RootError::Unsupported(format!(
                "32-bit key '{}' cannot be written at offset {}",
                key.name, self.end
            )));
        }

        let mut w = WBuffer::new(0);
        key.write(&mut w);
        w.put_bytes(stored);
        self.write_raw(w.as_bytes())?;
        log::trace!("wrote {} '{}' at {} ({} -> {} bytes)", key.class_name, key.name, key.seek_key, key.obj_len, key.n_bytes);
        Ok(())
    }

    /// Finish the file: StreamerInfo, key list, free segments and header.
    pub fn close(mut self) -> Result<()> {
        if self.streamer_info.is_none() {
            let key = self.new_key("TList", STREAMER_INFO_NAME, "Doubly linked list");
            let payload = write_empty_tlist(key.key_len as usize);
            self.write_streamer_info(key, &payload)?;
        }
        let mut trailer = Trailer::default();
        if let Some(info) = &self.streamer_info {
            trailer.seek_info = info.seek_key;
            trailer.nbytes_info = info.n_bytes;
        }

        // Key list: stored uncompressed.
        let mut list_key = Key::new("TFile", &self.name, &self.title, self.needs_large_keys());
        let mut body = WBuffer::new(0);
        body.put_i32(self.keys.len() as i32);
        for key in &self.keys {
            key.write(&mut body);
        }
        trailer.seek_keys = self.end;
        trailer.nbytes_keys = self.put_uncompressed(&mut list_key, body.as_bytes())?;

        // Free segments: everything past the end of this record.
        let free_large = self.needs_large_keys();
        let mut free_key = Key::new("TFile", &self.name, &self.title, self.needs_large_keys());
        let body_len = if free_large { 18 } else { 10 };
        let first = self.end + free_key.key_len as u64 + body_len;
        let mut body = WBuffer::new(0);
        if free_large {
            body.put_u16(FREE_VERSION + 1000);
            body.put_u64(first);
            body.put_u64(BIG_FILE_LAST_FREE);
        } else {
            body.put_u16(FREE_VERSION);
            body.put_u32(first as u32);
            body.put_u32(K_START_BIG_FILE as u32);
        }
        trailer.seek_free = self.end;
        trailer.nbytes_free = self.put_uncompressed(&mut free_key, body.as_bytes())?;
        trailer.end = self.end;

        let preamble = self.preamble(&trailer);
        self.file.flush()?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&preamble)?;
        self.file.flush()?;
        log::debug!("closed {} ({} bytes, {} keys)", self.path.display(), self.end, self.keys.len());
        Ok(())
    }

    fn put_uncompressed(&mut self, key: &mut Key, body: &[u8]) -> Result<u32> {
        key.datime = self.datime;
        key.obj_len = body.len() as u32;
        key.n_bytes = key.key_len as u32 + body.len() as u32;
        key.seek_key = self.end;
        key.seek_pdir = BEGIN;
        let mut w = WBuffer::new(0);
        key.write(&mut w);
        w.put_bytes(body);
        self.write_raw(w.as_bytes())?;
        Ok(key.n_bytes)
    }

    /// File header, name record and directory record.
    fn preamble(&self, t: &Trailer) -> Vec<u8> {
        let large = t.end > K_START_BIG_FILE;
        let header = FileHeader {
            version: ROOT_VERSION,
            is_large: large,
            begin: BEGIN,
            end: if t.end == 0 { self.end } else { t.end },
            seek_free: t.seek_free,
            nbytes_free: t.nbytes_free,
            n_free: (t.nbytes_free > 0) as u32,
            nbytes_name: self.nbytes_name,
            compress: self.setting.code(),
            seek_info: t.seek_info,
            nbytes_info: t.nbytes_info,
            uuid: self.uuid,
        };

        let mut w = WBuffer::new(0);
        header.write(&mut w);
        while (w.pos() as u64) < BEGIN {
            w.put_u8(0);
        }

        let mut name_key = Key::new("TFile", &self.name, &self.title, false);
        name_key.datime = self.datime;
        name_key.obj_len = self.nbytes_name - name_key.key_len as u32 + DIRECTORY_RECORD_LEN as u32;
        name_key.n_bytes = self.nbytes_name + DIRECTORY_RECORD_LEN as u32;
        name_key.seek_key = BEGIN;
        name_key.write(&mut w);
        w.put_string(&self.name);
        w.put_string(&self.title);

        let record = DirectoryRecord {
            datime_c: self.datime,
            datime_m: self.datime,
            nbytes_keys: t.nbytes_keys,
            nbytes_name: self.nbytes_name,
            seek_dir: BEGIN,
            seek_parent: 0,
            seek_keys: t.seek_keys,
            uuid: self.uuid,
        };
        record.write(&mut w, large);
        w.into_inner()
    }
}

/// Positions known only once the file is closed.
#[derive(Default)]
struct Trailer {
    end: u64,
    seek_keys: u64,
    nbytes_keys: u32,
    seek_free: u64,
    nbytes_free: u32,
    seek_info: u64,
    nbytes_info: u32,
}

/// Current local time as a ROOT `TDatime` word.
pub fn datime_now() -> u32 {
    let now = chrono::Local::now();
    encode_datime(now.year(), now.month(), now.day(), now.hour(), now.minute(), now.second())
}

fn encode_datime(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> u32 {
    let year = (year - 1995).max(0) as u32;
    (year << 26) | (month << 22) | (day << 17) | (hour << 12) | (minute << 6) | second
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::RootFile;

    fn temp_path(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("ntk-writer-{}-{}-{}.root", name, std::process::id(), nanos))
    }

    #[test]
    fn datime_packs_fields() {
        let d = encode_datime(2024, 3, 15, 12, 30, 45);
        assert_eq!(d >> 26, 29);
        assert_eq!((d >> 22) & 0xF, 3);
        assert_eq!((d >> 17) & 0x1F, 15);
        assert_eq!((d >> 12) & 0x1F, 12);
        assert_eq!((d >> 6) & 0x3F, 30);
        assert_eq!(d & 0x3F, 45);
    }

    #[test]
    fn empty_file_reopens() {
        let path = temp_path("empty");
        RootWriter::create(&path, CompressionSetting::MAX).unwrap().close().unwrap();

        let f = RootFile::open(&path).unwrap();
        assert!(f.list_keys().is_empty());
        assert!(!f.is_large());
        assert_eq!(f.header().compress, 209);
        assert_eq!(f.header().end as usize, f.file_data().len());
        let (key, _) = f.streamer_info().unwrap().expect("streamer info written");
        assert_eq!(key.class_name, "TList");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn objects_get_cycles_and_read_back() {
        let path = temp_path("objects");
        let mut w = RootWriter::create(&path, CompressionSetting::MAX).unwrap();
        let payload = vec![42u8; 4096];
        for _ in 0..2 {
            let key = w.new_key("TObjString", "note", "");
            w.write_object(key, &payload).unwrap();
        }
        w.close().unwrap();

        let f = RootFile::open(&path).unwrap();
        let keys = f.list_keys();
        assert_eq!(keys.iter().map(|k| k.cycle).collect::<Vec<_>>(), vec![1, 2]);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn create_truncates_existing_file() {
        let path = temp_path("recreate");
        std::fs::write(&path, vec![7u8; 100_000]).unwrap();
        RootWriter::create(&path, CompressionSetting::MAX).unwrap().close().unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() < 100_000);
        assert!(RootFile::open(&path).is_ok());
        std::fs::remove_file(&path).unwrap();
    }
}
