//! Binary reader for ROOT's big-endian serialization format.

use crate::error::{Result, RootError};

/// Set in the first word of a streamed object when a byte count follows.
pub const K_BYTE_COUNT_MASK: u32 = 0x4000_0000;
/// Class tag announcing a class name written inline.
pub const K_NEW_CLASS_TAG: u32 = 0xFFFF_FFFF;
/// Marks a class tag as a back-reference to an earlier class.
pub const K_CLASS_MASK: u32 = 0x8000_0000;
/// Offset added to buffer positions when they are used as reference tags.
pub const K_MAP_OFFSET: usize = 2;
/// `TObject::kIsReferenced`: a 2-byte process id follows the bits.
const K_IS_REFERENCED: u32 = 1 << 4;

macro_rules! be_readers {
    ($($name:ident -> $ty:ty),* $(,)?) => {
        $(
            #[doc = concat!("Read a big-endian `", stringify!($ty), "`.")]
            #[inline]
            pub fn $name(&mut self) -> Result<$ty> {
                Ok(<$ty>::from_be_bytes(self.take()?))
            }
        )*
    };
}

/// Big-endian cursor over a keyed object's bytes.
///
/// Reference tags inside a ROOT object buffer count from the start of the
/// key header, which is not part of `data`. `origin` is the length of that
/// missing prefix.
pub struct RBuffer<'a> {
    data: &'a [u8],
    pos: usize,
    origin: usize,
}

impl<'a> RBuffer<'a> {
    /// Reader at offset 0 of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_origin(data, 0)
    }

    /// Reader over a payload that follows a key header of `origin` bytes.
    pub fn with_origin(data: &'a [u8], origin: usize) -> Self {
        Self { data, pos: 0, origin }
    }

    /// Current read position.
    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// The position as a reference tag sees it.
    #[inline]
    pub fn displacement(&self) -> usize {
        self.pos + self.origin
    }

    /// Bytes left after the cursor.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Move the cursor; later reads fail if `pos` is past the end.
    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Advance by `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.read_bytes(n).map(|_| ())
    }

    /// The next `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let data = self.data;
        let Some(bytes) = self.pos.checked_add(n).and_then(|end| data.get(self.pos..end)) else {
            return Err(RootError::BufferUnderflow { offset: self.pos, need: n, have: self.remaining() });
        };
        self.pos += n;
        Ok(bytes)
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    be_readers! {
        read_u8 -> u8,
        read_u16 -> u16,
        read_i16 -> i16,
        read_u32 -> u32,
        read_i32 -> i32,
        read_u64 -> u64,
        read_i64 -> i64,
        read_f32 -> f32,
        read_f64 -> f64,
    }

    /// Read a `TString`: one length byte, or 255 and a u32 length, then
    /// the bytes.
    pub fn read_string(&mut self) -> Result<String> {
        let len = match self.read_u8()? {
            255 => self.read_u32()? as usize,
            short => short as usize,
        };
        Ok(String::from_utf8_lossy(self.read_bytes(len)?).into_owned())
    }

    /// Read a NUL-terminated class name.
    pub fn read_cstring(&mut self) -> Result<String> {
        let rest = self.data.get(self.pos..).unwrap_or_default();
        let Some(len) = rest.iter().position(|&b| b == 0) else {
            return Err(RootError::BufferUnderflow {
                offset: self.pos,
                need: rest.len() + 1,
                have: rest.len(),
            });
        };
        let name = String::from_utf8_lossy(&rest[..len]).into_owned();
        self.pos += len + 1;
        Ok(name)
    }

    /// Read a class version, with its byte count when one is written.
    ///
    /// Returns the version and the position just past the object. With
    /// [`K_BYTE_COUNT_MASK`] set, the low 30 bits of the first word count
    /// the bytes after that word; otherwise only a 2-byte version is present.
    pub fn read_version(&mut self) -> Result<(u16, Option<usize>)> {
        let start = self.pos;
        let word = self.read_u32()?;
        if word & K_BYTE_COUNT_MASK == 0 {
            self.pos = start + 2;
            return Ok(((word >> 16) as u16, None));
        }
        let end = start + 4 + (word & !K_BYTE_COUNT_MASK) as usize;
        Ok((self.read_u16()?, Some(end)))
    }

    /// Jump past a streamed object that carries a byte count.
    pub fn skip_versioned(&mut self) -> Result<()> {
        let at = self.pos;
        match self.read_version()? {
            (_, Some(end)) if end <= self.data.len() => {
                self.pos = end;
                Ok(())
            }
            (_, Some(end)) => Err(RootError::BufferUnderflow {
                offset: at,
                need: end - at,
                have: self.data.len().saturating_sub(at),
            }),
            (_, None) => Err(RootError::Deserialization(format!(
                "object at {} has no byte count to skip by",
                at
            ))),
        }
    }

    /// Read a `TObject` header: fUniqueID (u32) + fBits (u32).
    pub fn read_tobject(&mut self) -> Result<(u32, u32)> {
        let _ver = self.read_u16()?;
        let unique_id = self.read_u32()?;
        let bits = self.read_u32()?;
        if bits & K_IS_REFERENCED != 0 {
            self.skip(2)?;
        }
        Ok((unique_id, bits))
    }

    /// Read a `TNamed`: TObject + fName + fTitle.
    pub fn read_tnamed(&mut self) -> Result<(String, String)> {
        let (_ver, end) = self.read_version()?;
        self.read_tobject()?;
        let name = self.read_string()?;
        let title = self.read_string()?;
        if let Some(end_pos) = end {
            self.pos = end_pos;
        }
        Ok((name, title))
    }
}
