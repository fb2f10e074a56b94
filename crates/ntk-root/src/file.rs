//! TFile header parsing and top-level ROOT file interface.

use std::path::{Path, PathBuf};

use crate::branch_reader::BranchReader;
use crate::datasource::{FileBytes, record};
use crate::decompress::decompress;
use crate::directory::{Directory, DirectoryRecord};
use crate::error::{Result, RootError};
use crate::key::{Key, KeyInfo};
use crate::objects;
use crate::rbuffer::RBuffer;
use crate::tree::Tree;
use crate::wbuffer::WBuffer;

/// The four magic bytes every ROOT file starts with.
pub const ROOT_MAGIC: &[u8; 4] = b"root";

/// `fVersion` values at or above this mark a file with 64-bit header fields.
pub const LARGE_FILE_VERSION: u32 = 1_000_000;

/// Name of the key holding the class layout descriptions.
pub const STREAMER_INFO_NAME: &str = "StreamerInfo";

/// Parsed ROOT file header.
///
/// Layout of the small (32-bit) variant:
/// ```text
/// offset  size  field
///    0      4   magic "root"
///    4      4   fVersion
///    8      4   fBEGIN
///   12      4   fEND
///   16      4   fSeekFree
///   20      4   fNbytesFree
///   24      4   nfree
///   28      4   fNbytesName
///   32      1   fUnits
///   33      4   fCompress
///   37      4   fSeekInfo
///   41      4   fNbytesInfo
///   45     18   fUUID
/// ```
/// Large files widen `fEND`, `fSeekFree` and `fSeekInfo` to 8 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// ROOT version that wrote the file (without the large-file offset).
    pub version: u32,
    /// Whether the header uses 64-bit fields.
    pub is_large: bool,
    /// Offset of first data record (also where the top directory key sits).
    pub begin: u64,
    /// End of the last record.
    pub end: u64,
    /// Position of the free-segments record.
    pub seek_free: u64,
    /// Size of the free-segments record.
    pub nbytes_free: u32,
    /// Number of free segments.
    pub n_free: u32,
    /// Number of bytes for the name record (TKey + TNamed) at begin.
    pub nbytes_name: u32,
    /// Default compression setting of the file.
    pub compress: i32,
    /// Position of the StreamerInfo record.
    pub seek_info: u64,
    /// Size of the StreamerInfo record.
    pub nbytes_info: u32,
    /// File UUID.
    pub uuid: [u8; 16],
}

impl FileHeader {
    /// Parse the header at the start of `data`.
    pub fn read(data: &[u8]) -> Result<Self> {
        if data.len() < 4 || &data[0..4] != ROOT_MAGIC {
            return Err(RootError::BadMagic);
        }
        let mut r = RBuffer::new(data);
        r.skip(4)?;

        let raw_version = r.read_u32()?;
        let is_large = raw_version >= LARGE_FILE_VERSION;
        let begin = r.read_u32()? as u64;

        let read_seek = |r: &mut RBuffer| -> Result<u64> {
            if is_large { r.read_u64() } else { Ok(r.read_u32()? as u64) }
        };

        let end = read_seek(&mut r)?;
        let seek_free = read_seek(&mut r)?;
        let nbytes_free = r.read_u32()?;
        let n_free = r.read_u32()?;
        let nbytes_name = r.read_u32()?;
        let _units = r.read_u8()?;
        let compress = r.read_i32()?;
        let seek_info = read_seek(&mut r)?;
        let nbytes_info = r.read_u32()?;
        let mut uuid = [0u8; 16];
        if r.remaining() >= 18 {
            let _uuid_version = r.read_u16()?;
            uuid.copy_from_slice(r.read_bytes(16)?);
        }

        Ok(Self {
            version: raw_version % LARGE_FILE_VERSION,
            is_large,
            begin,
            end,
            seek_free,
            nbytes_free,
            n_free,
            nbytes_name,
            compress,
            seek_info,
            nbytes_info,
            uuid,
        })
    }

    /// Encode the header (without padding up to `begin`).
    pub fn write(&self, w: &mut WBuffer) {
        w.put_bytes(ROOT_MAGIC);
        let version = if self.is_large { self.version + LARGE_FILE_VERSION } else { self.version };
        w.put_u32(version);
        w.put_u32(self.begin as u32);
        let large = self.is_large;
        let put_seek = |w: &mut WBuffer, v: u64| {
            if large { w.put_u64(v) } else { w.put_u32(v as u32) }
        };
        put_seek(w, self.end);
        put_seek(w, self.seek_free);
        w.put_u32(self.nbytes_free);
        w.put_u32(self.n_free);
        w.put_u32(self.nbytes_name);
        w.put_u8(if large { 8 } else { 4 }); // fUnits
        w.put_i32(self.compress);
        put_seek(w, self.seek_info);
        w.put_u32(self.nbytes_info);
        w.put_u16(1);
        w.put_bytes(&self.uuid);
    }
}

/// A ROOT file opened for reading trees.
pub struct RootFile {
    data: FileBytes,
    /// Parsed header.
    header: FileHeader,
    /// Top-level key list, read once at open.
    directory: Directory,
    /// Path for diagnostics.
    path: PathBuf,
}

impl RootFile {
    /// Open and parse a ROOT file from disk using memory mapping.
    ///
    /// Fails when the file cannot be read, is not a ROOT file, or its top
    /// directory is unreadable (what ROOT calls a zombie).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = FileBytes::map(&path)?;
        Self::parse(data, path)
    }

    /// Parse a ROOT file from a byte vector (for testing).
    pub fn from_bytes(data: Vec<u8>, path: PathBuf) -> Result<Self> {
        Self::parse(FileBytes::Owned(data), path)
    }

    fn parse(data: FileBytes, path: PathBuf) -> Result<Self> {
        let header = FileHeader::read(&data)?;

        // The top directory record follows the name record at fBEGIN.
        let dir_offset = (header.begin + header.nbytes_name as u64) as usize;
        if dir_offset >= data.len() {
            return Err(RootError::Deserialization("TDirectory offset past end of file".into()));
        }
        let mut r = RBuffer::new(&data);
        r.set_pos(dir_offset);
        let record = DirectoryRecord::read(&mut r)?;
        let directory = Directory::read_key_list(&data, record.seek_keys as usize)?;

        log::debug!(
            "opened {} ({} bytes, {}, {} keys)",
            path.display(),
            data.len(),
            if data.is_mapped() { "mapped" } else { "in memory" },
            directory.keys().len()
        );

        Ok(Self { data, header, directory, path })
    }

    /// List all keys in the top-level directory.
    pub fn list_keys(&self) -> Vec<KeyInfo> {
        self.directory.keys().iter().map(KeyInfo::from_key).collect()
    }

    /// The parsed file header.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Path the file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Access the raw file data.
    pub fn file_data(&self) -> &[u8] {
        &self.data
    }

    /// Whether the file header uses 64-bit seek pointers.
    pub fn is_large(&self) -> bool {
        self.header.is_large
    }

    /// Read and decompress the payload of a TKey.
    pub fn read_key_payload(&self, key: &Key) -> Result<Vec<u8>> {
        read_key_payload_from(&self.data, key)
    }

    // ── TTree API ──────────────────────────────────────────────

    /// Key and decompressed payload of the named TTree (highest cycle).
    pub fn tree_record(&self, name: &str) -> Result<(Key, Vec<u8>)> {
        let key = self
            .directory
            .find_key(name)
            .ok_or_else(|| RootError::TreeNotFound(name.to_string()))?;

        if key.class_name != "TTree" {
            return Err(RootError::TreeNotFound(format!(
                "'{}' is {} not TTree",
                name, key.class_name
            )));
        }

        let payload = self.read_key_payload(key)?;
        Ok((key.clone(), payload))
    }

    /// Read a TTree by name from the top-level directory.
    pub fn get_tree(&self, name: &str) -> Result<Tree> {
        let (key, payload) = self.tree_record(name)?;
        objects::read_ttree(&payload, key.key_len as usize)
    }

    /// Key and decompressed payload of the StreamerInfo list, if the file
    /// has one.
    pub fn streamer_info(&self) -> Result<Option<(Key, Vec<u8>)>> {
        if self.header.seek_info == 0 {
            return Ok(None);
        }
        let mut r = RBuffer::new(&self.data);
        r.set_pos(self.header.seek_info as usize);
        let key = Key::read(&mut r)?;
        if key.name != STREAMER_INFO_NAME {
            return Err(RootError::Deserialization(format!(
                "fSeekInfo points at '{}', not {}",
                key.name, STREAMER_INFO_NAME
            )));
        }
        let payload = self.read_key_payload(&key)?;
        Ok(Some((key, payload)))
    }

    /// Create a [`BranchReader`] for the named branch.
    pub fn branch_reader<'a>(&'a self, tree: &'a Tree, branch: &str) -> Result<BranchReader<'a>> {
        let info = tree
            .find_branch(branch)
            .ok_or_else(|| RootError::BranchNotFound(branch.to_string()))?;
        Ok(BranchReader::new(&self.data, info))
    }

    /// Convenience: read all entries from a branch as `f64`.
    pub fn branch_data(&self, tree: &Tree, branch: &str) -> Result<Vec<f64>> {
        self.branch_reader(tree, branch)?.as_f64()
    }
}

/// Shared helper: read and decompress a TKey payload from raw file bytes.
pub(crate) fn read_key_payload_from(data: &[u8], key: &Key) -> Result<Vec<u8>> {
    let key_len = key.key_len as usize;
    let n_bytes = key.n_bytes as usize;
    if n_bytes < key_len {
        return Err(RootError::Deserialization(format!(
            "key '{}' is {} bytes with a {}-byte header",
            key.name, n_bytes, key_len
        )));
    }
    let stored = &record(data, key.seek_key, n_bytes)?[key_len..];
    if key.is_uncompressed() { Ok(stored.to_vec()) } else { decompress(stored, key.obj_len as usize) }
}
