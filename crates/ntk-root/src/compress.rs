//! ROOT compression settings and block compression for writing.
//!
//! A setting is encoded the way ROOT stores it in `fCompress`:
//! `algorithm * 100 + level`, e.g. `209` for LZMA at level 9. Level 0 means
//! "store uncompressed". Output uses the same 9-byte block header that
//! [`decompress`](crate::decompress::decompress) reads.

use std::fmt;
use std::io::Write;

use crate::decompress::{BLOCK_HEADER_LEN, BlockHeader};
use crate::error::{Result, RootError};

/// Largest uncompressed (and compressed) size one block header can describe.
const MAX_BLOCK_LEN: usize = 0xFF_FFFF;

/// Compression algorithms known to ROOT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// `ZL`: zlib (also used for ROOT's "global default" code 0).
    Zlib,
    /// `XZ`: LZMA in an xz container.
    Lzma,
    /// `L4`: LZ4 with an xxhash64 prefix (read-only here).
    Lz4,
    /// `ZS`: Zstandard.
    Zstd,
}

impl Algorithm {
    /// The algorithm behind a block tag.
    pub fn from_tag(tag: &[u8; 2]) -> Option<Self> {
        match tag {
            b"ZL" => Some(Algorithm::Zlib),
            b"XZ" => Some(Algorithm::Lzma),
            b"L4" => Some(Algorithm::Lz4),
            b"ZS" => Some(Algorithm::Zstd),
            _ => None,
        }
    }

    fn tag(self) -> [u8; 2] {
        match self {
            Algorithm::Zlib => *b"ZL",
            Algorithm::Lzma => *b"XZ",
            Algorithm::Lz4 => *b"L4",
            Algorithm::Zstd => *b"ZS",
        }
    }

    fn code(self) -> i32 {
        match self {
            Algorithm::Zlib => 1,
            Algorithm::Lzma => 2,
            Algorithm::Lz4 => 4,
            Algorithm::Zstd => 5,
        }
    }
}

/// A ROOT compression setting (algorithm + level).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionSetting {
    /// Compression algorithm.
    pub algorithm: Algorithm,
    /// Level 0..=9; 0 disables compression.
    pub level: u8,
}

impl CompressionSetting {
    /// The strongest setting ROOT offers: LZMA at level 9 (`209`).
    pub const MAX: CompressionSetting = CompressionSetting { algorithm: Algorithm::Lzma, level: 9 };

    /// Objects are stored as-is.
    pub const NONE: CompressionSetting = CompressionSetting { algorithm: Algorithm::Zlib, level: 0 };

    /// Create a setting; levels above 9 are clamped.
    pub fn new(algorithm: Algorithm, level: u8) -> Self {
        Self { algorithm, level: level.min(9) }
    }

    /// Decode ROOT's integer form (`fCompress`).
    pub fn from_code(code: i32) -> Result<Self> {
        if code < 0 {
            return Err(RootError::Unsupported(format!("compression setting {}", code)));
        }
        let algorithm = match code / 100 {
            0 | 1 | 3 => Algorithm::Zlib,
            2 => Algorithm::Lzma,
            4 => Algorithm::Lz4,
            5 => Algorithm::Zstd,
            other => {
                return Err(RootError::Unsupported(format!("compression algorithm {}", other)));
            }
        };
        Ok(Self::new(algorithm, (code % 100) as u8))
    }

    /// ROOT's integer form of this setting.
    pub fn code(self) -> i32 {
        self.algorithm.code() * 100 + self.level as i32
    }

    /// Whether objects written with this setting are compressed at all.
    pub fn is_compressed(self) -> bool {
        self.level > 0
    }

    /// Compress `src` into ROOT blocks.
    ///
    /// Returns `Ok(None)` when the data should be stored uncompressed: level 0,
    /// empty input, or output that is not smaller than the input.
    pub fn compress(self, src: &[u8]) -> Result<Option<Vec<u8>>> {
        if !self.is_compressed() || src.is_empty() {
            return Ok(None);
        }

        let mut out = Vec::with_capacity(src.len() / 2 + BLOCK_HEADER_LEN);
        for chunk in src.chunks(MAX_BLOCK_LEN) {
            let (method, body) = self.compress_block(chunk)?;
            if body.len() > MAX_BLOCK_LEN {
                return Ok(None);
            }
            let header = BlockHeader {
                tag: self.algorithm.tag(),
                method,
                stored_len: body.len(),
                raw_len: chunk.len(),
            };
            header.put(&mut out);
            out.extend_from_slice(&body);
        }

        if out.len() >= src.len() { Ok(None) } else { Ok(Some(out)) }
    }

    fn compress_block(self, chunk: &[u8]) -> Result<(u8, Vec<u8>)> {
        match self.algorithm {
            Algorithm::Zlib => {
                let mut enc = flate2::write::ZlibEncoder::new(
                    Vec::with_capacity(chunk.len() / 2),
                    flate2::Compression::new(self.level as u32),
                );
                enc.write_all(chunk).map_err(|e| RootError::Compression(format!("zlib: {}", e)))?;
                let body = enc.finish().map_err(|e| RootError::Compression(format!("zlib: {}", e)))?;
                Ok((8, body))
            }
            Algorithm::Lzma => {
                let stream = xz2::stream::Stream::new_easy_encoder(
                    self.level as u32,
                    xz2::stream::Check::Crc32,
                )
                .map_err(|e| RootError::Compression(format!("xz: {}", e)))?;
                let mut enc = xz2::write::XzEncoder::new_stream(
                    Vec::with_capacity(chunk.len() / 2),
                    stream,
                );
                enc.write_all(chunk).map_err(|e| RootError::Compression(format!("xz: {}", e)))?;
                let body = enc.finish().map_err(|e| RootError::Compression(format!("xz: {}", e)))?;
                Ok((0, body))
            }
            Algorithm::Zstd => {
                // ruzstd implements a single encoder level.
                let body = ruzstd::encoding::compress_to_vec(
                    chunk,
                    ruzstd::encoding::CompressionLevel::Fastest,
                );
                Ok((1, body))
            }
            Algorithm::Lz4 => {
                Err(RootError::Compression("writing LZ4 blocks is not supported".into()))
            }
        }
    }
}

impl Default for CompressionSetting {
    /// ROOT's long-standing default: zlib level 1 (`101`).
    fn default() -> Self {
        Self::new(Algorithm::Zlib, 1)
    }
}

impl fmt::Display for CompressionSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?} level {})", self.code(), self.algorithm, self.level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompress::decompress;

    fn compressible() -> Vec<u8> {
        (0..20_000u32).flat_map(|i| (i % 17).to_be_bytes()).collect()
    }

    #[test]
    fn code_round_trip() {
        assert_eq!(CompressionSetting::MAX.code(), 209);
        assert_eq!(CompressionSetting::from_code(209).unwrap(), CompressionSetting::MAX);
        assert_eq!(CompressionSetting::from_code(101).unwrap(), CompressionSetting::default());
        assert_eq!(CompressionSetting::from_code(1).unwrap().algorithm, Algorithm::Zlib);
        assert!(CompressionSetting::from_code(-1).is_err());
        assert!(CompressionSetting::from_code(905).is_err());
    }

    #[test]
    fn lzma_max_decodes_back() {
        let src = compressible();
        let packed = CompressionSetting::MAX.compress(&src).unwrap().expect("should shrink");
        assert_eq!(&packed[..2], b"XZ");
        assert!(packed.len() < src.len());
        assert_eq!(decompress(&packed, src.len()).unwrap(), src);
    }

    #[test]
    fn zlib_and_zstd_decode_back() {
        let src = compressible();
        for setting in [
            CompressionSetting::new(Algorithm::Zlib, 6),
            CompressionSetting::new(Algorithm::Zstd, 5),
        ] {
            let packed = setting.compress(&src).unwrap().expect("should shrink");
            assert_eq!(decompress(&packed, src.len()).unwrap(), src, "{}", setting);
        }
    }

    #[test]
    fn level_zero_and_incompressible_stay_raw() {
        assert!(CompressionSetting::NONE.compress(&compressible()).unwrap().is_none());
        assert!(CompressionSetting::MAX.compress(&[]).unwrap().is_none());
        // Eight bytes cannot beat a 9-byte block header.
        assert!(CompressionSetting::MAX.compress(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap().is_none());
    }

    #[test]
    fn lz4_writing_is_rejected() {
        let setting = CompressionSetting::new(Algorithm::Lz4, 4);
        assert!(matches!(setting.compress(&compressible()), Err(RootError::Compression(_))));
    }
}
