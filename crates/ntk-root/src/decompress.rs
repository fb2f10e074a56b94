//! Reading ROOT compressed objects.
//!
//! A compressed object is a run of blocks, each behind a 9-byte header:
//! ```text
//! 0..2  algorithm tag  "ZL" | "XZ" | "L4" | "ZS"
//! 2     method byte
//! 3..6  stored length        (little-endian u24)
//! 6..9  uncompressed length  (little-endian u24)
//! ```

use std::io::Read;

use crate::compress::Algorithm;
use crate::error::{Result, RootError};

/// Size of the per-block header.
pub const BLOCK_HEADER_LEN: usize = 9;

/// LZ4 blocks start with an xxhash64 of the LZ4 frame.
const LZ4_CHECKSUM_LEN: usize = 8;

std::thread_local! {
    static ZSTD_DECODER: std::cell::RefCell<ruzstd::decoding::FrameDecoder> =
        std::cell::RefCell::new(ruzstd::decoding::FrameDecoder::new());
}

/// Header of one compressed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Two-letter algorithm tag.
    pub tag: [u8; 2],
    /// Algorithm-specific method byte.
    pub method: u8,
    /// Bytes of compressed data following the header.
    pub stored_len: usize,
    /// Bytes the block expands to.
    pub raw_len: usize,
}

impl BlockHeader {
    /// Parse the header at the start of `b`.
    pub fn parse(b: &[u8]) -> Option<Self> {
        let b = b.get(..BLOCK_HEADER_LEN)?;
        let u24 = |i: usize| b[i] as usize | (b[i + 1] as usize) << 8 | (b[i + 2] as usize) << 16;
        Some(Self { tag: [b[0], b[1]], method: b[2], stored_len: u24(3), raw_len: u24(6) })
    }

    /// Append the encoded header to `out`. Lengths must fit in 24 bits.
    pub fn put(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.tag);
        out.push(self.method);
        out.extend_from_slice(&(self.stored_len as u32).to_le_bytes()[..3]);
        out.extend_from_slice(&(self.raw_len as u32).to_le_bytes()[..3]);
    }

    fn algorithm(&self) -> Result<Algorithm> {
        Algorithm::from_tag(&self.tag).ok_or_else(|| {
            RootError::Decompression(format!(
                "unknown block tag {:?}",
                String::from_utf8_lossy(&self.tag)
            ))
        })
    }
}

/// Expand the blocks in `src` into exactly `expected_len` bytes.
pub fn decompress(src: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected_len);
    let mut rest = src;

    while out.len() < expected_len {
        let Some(header) = BlockHeader::parse(rest) else { break };
        let body = rest.get(BLOCK_HEADER_LEN..BLOCK_HEADER_LEN + header.stored_len).ok_or_else(|| {
            RootError::Decompression(format!(
                "block of {} bytes truncated to {}",
                header.stored_len,
                rest.len() - BLOCK_HEADER_LEN
            ))
        })?;

        let before = out.len();
        expand_block(header.algorithm()?, body, header.raw_len, &mut out)?;
        if out.len() - before != header.raw_len {
            return Err(RootError::Decompression(format!(
                "block expanded to {} bytes, header says {}",
                out.len() - before,
                header.raw_len
            )));
        }
        rest = &rest[BLOCK_HEADER_LEN + header.stored_len..];
    }

    if out.len() != expected_len {
        return Err(RootError::Decompression(format!(
            "object expanded to {} bytes, key says {}",
            out.len(),
            expected_len
        )));
    }
    Ok(out)
}

fn expand_block(algorithm: Algorithm, body: &[u8], raw_len: usize, out: &mut Vec<u8>) -> Result<()> {
    let fail = |what: &str, e: &dyn std::fmt::Display| RootError::Decompression(format!("{}: {}", what, e));
    match algorithm {
        Algorithm::Zlib => {
            flate2::read::ZlibDecoder::new(body).read_to_end(out).map_err(|e| fail("zlib", &e))?;
        }
        Algorithm::Lzma => {
            lzma_rs::xz_decompress(&mut std::io::BufReader::new(body), out)
                .map_err(|e| fail("xz", &e))?;
        }
        Algorithm::Lz4 => {
            let frame = body.get(LZ4_CHECKSUM_LEN..).ok_or_else(|| {
                RootError::Decompression("lz4 block shorter than its checksum".into())
            })?;
            let block = lz4_flex::decompress(frame, raw_len).map_err(|e| fail("lz4", &e))?;
            out.extend_from_slice(&block);
        }
        Algorithm::Zstd => {
            let start = out.len();
            out.resize(start + raw_len, 0);
            let written = ZSTD_DECODER
                .with(|cell| cell.borrow_mut().decode_all(body, &mut out[start..]))
                .map_err(|e| fail("zstd", &e))?;
            out.truncate(start + written);
        }
    }
    Ok(())
}
