//! Basket (compressed data block) reading and encoding for TTree branches.
//!
//! A basket is a TKey of class `TBasket` whose header carries five extra
//! fields. Its object payload is the entry data, optionally followed by an
//! entry-offset table for variable-size entries:
//! ```text
//! [data: fLast - fKeylen bytes][i32 n+1][i32 offset(0) .. offset(n-1)][i32 0]
//! ```
//! Offsets in the table count from the start of the key.

use std::ops::Range;

use crate::datasource::record;
use crate::decompress::decompress;
use crate::error::{Result, RootError};
use crate::key::Key;
use crate::rbuffer::RBuffer;
use crate::wbuffer::WBuffer;

/// TBasket class version.
pub const BASKET_VERSION: u16 = 3;

/// Bytes the basket fields add to the key header.
pub const BASKET_HEADER_EXTRA: usize = 19;

/// The key header of a basket record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasketHeader {
    /// Plain TKey fields; `key_len` includes the basket fields.
    pub key: Key,
    /// `fVersion`.
    pub version: u16,
    /// `fBufferSize`.
    pub buffer_size: i32,
    /// `fNevBufSize`: entry size for fixed-size entries.
    pub nev_buf_size: i32,
    /// `fNevBuf`: number of entries in the basket.
    pub nev_buf: i32,
    /// `fLast`: end of the entry data, counted from the key start.
    pub last: i32,
    /// Streaming flag.
    pub flag: u8,
}

impl BasketHeader {
    /// A fresh header for a basket of `branch` in `tree`.
    pub fn new(branch: &str, tree: &str, large: bool) -> Self {
        let mut key = Key::new("TBasket", branch, tree, large);
        key.key_len += BASKET_HEADER_EXTRA as u16;
        Self {
            key,
            version: BASKET_VERSION,
            buffer_size: 0,
            nev_buf_size: 0,
            nev_buf: 0,
            last: 0,
            flag: 0,
        }
    }

    /// Parse a basket header at the reader's position.
    pub fn read(r: &mut RBuffer) -> Result<Self> {
        let key = Key::read(r)?;
        let version = r.read_u16()?;
        let buffer_size = r.read_i32()?;
        let nev_buf_size = r.read_i32()?;
        let nev_buf = r.read_i32()?;
        let last = r.read_i32()?;
        let flag = r.read_u8()?;
        Ok(Self { key, version, buffer_size, nev_buf_size, nev_buf, last, flag })
    }

    /// Encode the header (`key_len` bytes).
    pub fn write(&self, w: &mut WBuffer) {
        self.key.write(w);
        w.put_u16(self.version);
        w.put_i32(self.buffer_size);
        w.put_i32(self.nev_buf_size);
        w.put_i32(self.nev_buf);
        w.put_i32(self.last);
        w.put_u8(self.flag);
    }

    /// Length of the entry data inside the payload (`fLast - fKeylen`).
    pub fn border(&self) -> Result<usize> {
        (self.last as i64 - self.key.key_len as i64).try_into().map_err(|_| {
            RootError::Deserialization(format!(
                "basket '{}': fLast={} below fKeylen={}",
                self.key.name, self.last, self.key.key_len
            ))
        })
    }
}

/// A decompressed basket with its entries located.
#[derive(Debug, Clone)]
pub struct Basket {
    header: BasketHeader,
    payload: Vec<u8>,
    /// `n + 1` entry boundaries inside `payload`.
    bounds: Vec<usize>,
}

impl Basket {
    /// Read, decompress and split the basket record at `seek`.
    pub fn read(file_data: &[u8], seek: u64) -> Result<Self> {
        let (header, stored) = read_record(file_data, seek)?;
        let payload = if header.key.is_uncompressed() {
            stored.to_vec()
        } else {
            decompress(stored, header.key.obj_len as usize)?
        };
        Self::from_parts(header, payload)
    }

    /// Split an already decompressed payload, validating the entry layout.
    pub fn from_parts(header: BasketHeader, payload: Vec<u8>) -> Result<Self> {
        let bounds = split_entries(&header, &payload)?;
        Ok(Self { header, payload, bounds })
    }

    /// The basket's key header.
    pub fn header(&self) -> &BasketHeader {
        &self.header
    }

    /// Number of entries.
    pub fn n_entries(&self) -> usize {
        self.bounds.len() - 1
    }

    /// Byte range of entry `i` inside [`payload`](Self::payload).
    pub fn entry_range(&self, i: usize) -> Option<Range<usize>> {
        Some(*self.bounds.get(i)?..*self.bounds.get(i + 1)?)
    }

    /// Bytes of entry `i`.
    pub fn entry(&self, i: usize) -> Option<&[u8]> {
        self.entry_range(i).map(|r| &self.payload[r])
    }

    /// Entry data without the offset table.
    pub fn data(&self) -> &[u8] {
        &self.payload[..self.bounds[self.bounds.len() - 1]]
    }

    /// The full decompressed payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take the decompressed payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

/// Locate the basket record at `seek`: parsed header plus the stored
/// (possibly compressed) object bytes.
pub fn read_record(file_data: &[u8], seek: u64) -> Result<(BasketHeader, &[u8])> {
    let pos = usize::try_from(seek)
        .map_err(|_| RootError::Deserialization(format!("basket seek {} out of range", seek)))?;
    if pos >= file_data.len() {
        return Err(RootError::BufferUnderflow { offset: pos, need: 1, have: 0 });
    }

    let mut r = RBuffer::new(file_data);
    r.set_pos(pos);
    let header = BasketHeader::read(&mut r)?;
    if header.key.class_name != "TBasket" {
        return Err(RootError::Deserialization(format!(
            "expected TBasket at {}, found {}",
            pos, header.key.class_name
        )));
    }

    let key_len = header.key.key_len as usize;
    let n_bytes = header.key.n_bytes as usize;
    if n_bytes < key_len {
        return Err(RootError::Deserialization(format!(
            "basket at {} is {} bytes with a {}-byte header",
            pos, n_bytes, key_len
        )));
    }
    let stored = &record(file_data, seek, n_bytes)?[key_len..];
    Ok((header, stored))
}

/// Build a basket payload from entry data. `starts` holds the start of each
/// entry inside `data` for variable-size entries.
pub fn encode_payload(data: &[u8], starts: Option<&[usize]>, key_len: usize) -> Vec<u8> {
    let Some(starts) = starts else {
        return data.to_vec();
    };
    let mut w = WBuffer::new(0);
    w.put_bytes(data);
    w.put_i32(starts.len() as i32 + 1);
    for &s in starts {
        w.put_i32((s + key_len) as i32);
    }
    w.put_i32(0);
    w.into_inner()
}

fn split_entries(h: &BasketHeader, payload: &[u8]) -> Result<Vec<usize>> {
    let name = &h.key.name;
    let border = h.border()?;
    if border > payload.len() {
        return Err(RootError::Deserialization(format!(
            "basket '{}': data end {} past payload length {}",
            name,
            border,
            payload.len()
        )));
    }
    let n = usize::try_from(h.nev_buf).map_err(|_| {
        RootError::Deserialization(format!("basket '{}': fNevBuf={}", name, h.nev_buf))
    })?;

    if payload.len() > border {
        let key_len = h.key.key_len as usize;
        let mut r = RBuffer::new(&payload[border..]);
        let count = r.read_i32()?;
        if count as i64 != n as i64 + 1 {
            return Err(RootError::Deserialization(format!(
                "basket '{}': offset table has {} slots for {} entries",
                name, count, n
            )));
        }

        let mut bounds = Vec::with_capacity(n + 1);
        for _ in 0..n {
            let raw = r.read_i32()? as i64;
            let at = raw - key_len as i64;
            let prev = bounds.last().copied().unwrap_or(0);
            if at < prev as i64 || at > border as i64 {
                return Err(RootError::Deserialization(format!(
                    "basket '{}': invalid entry offset {}",
                    name, raw
                )));
            }
            bounds.push(at as usize);
        }
        bounds.push(border);
        return Ok(bounds);
    }

    let size = usize::try_from(h.nev_buf_size).map_err(|_| {
        RootError::Deserialization(format!("basket '{}': fNevBufSize={}", name, h.nev_buf_size))
    })?;
    if n * size != border {
        return Err(RootError::Deserialization(format!(
            "basket '{}': {} entries of {} bytes do not fill {} bytes",
            name, n, size, border
        )));
    }
    Ok((0..=n).map(|i| i * size).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(nev_buf: i32, nev_buf_size: i32, data_len: usize) -> BasketHeader {
        let mut h = BasketHeader::new("jetPt", "AnalysisTree", false);
        h.nev_buf = nev_buf;
        h.nev_buf_size = nev_buf_size;
        h.last = (h.key.key_len as usize + data_len) as i32;
        h
    }

    #[test]
    fn header_round_trip_has_key_len_bytes() {
        let h = header(3, 4, 12);
        let mut w = WBuffer::new(0);
        h.write(&mut w);
        let bytes = w.into_inner();
        assert_eq!(bytes.len(), h.key.key_len as usize);
        assert_eq!(BasketHeader::read(&mut RBuffer::new(&bytes)).unwrap(), h);
    }

    #[test]
    fn fixed_size_entries() {
        let data: Vec<u8> = (0..12).collect();
        let basket = Basket::from_parts(header(3, 4, 12), data).unwrap();
        assert_eq!(basket.n_entries(), 3);
        assert_eq!(basket.entry(1).unwrap(), &[4, 5, 6, 7]);
        assert!(basket.entry(3).is_none());
    }

    #[test]
    fn variable_entries_use_offset_table() {
        let h = header(3, 1000, 7);
        let payload = encode_payload(b"abcdefg", Some(&[0, 2, 2]), h.key.key_len as usize);
        let basket = Basket::from_parts(h, payload).unwrap();
        assert_eq!(basket.n_entries(), 3);
        assert_eq!(basket.entry(0).unwrap(), b"ab");
        assert_eq!(basket.entry(1).unwrap(), b"");
        assert_eq!(basket.entry(2).unwrap(), b"cdefg");
        assert_eq!(basket.data(), b"abcdefg");
    }

    #[test]
    fn bad_offset_table_is_rejected() {
        let h = header(2, 1000, 4);
        let key_len = h.key.key_len as usize;
        // decreasing offsets
        let payload = encode_payload(b"abcd", Some(&[3, 1]), key_len);
        assert!(Basket::from_parts(h.clone(), payload).is_err());
        // wrong slot count
        let payload = encode_payload(b"abcd", Some(&[0]), key_len);
        assert!(Basket::from_parts(h, payload).is_err());
    }

    #[test]
    fn fixed_size_mismatch_is_rejected() {
        assert!(Basket::from_parts(header(3, 4, 10), vec![0; 10]).is_err());
    }

    #[test]
    fn last_before_key_end_is_rejected() {
        let mut h = header(0, 0, 0);
        h.last = 10;
        assert!(Basket::from_parts(h, Vec::new()).is_err());
    }

    #[test]
    fn record_outside_file_is_rejected() {
        assert!(read_record(&[0u8; 16], 64).is_err());
    }
}
