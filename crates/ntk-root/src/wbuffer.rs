//! Binary writer for ROOT's big-endian serialization format.
//!
//! The mirror image of [`RBuffer`](crate::rbuffer::RBuffer): byte counts are
//! reserved up front and patched when the object ends, class names are
//! written once and referenced afterwards, and objects can be referenced by
//! the tag of the position they were first written at.

use std::collections::HashMap;

use crate::rbuffer::{K_BYTE_COUNT_MASK, K_CLASS_MASK, K_MAP_OFFSET, K_NEW_CLASS_TAG};

/// `fBits` written for streamed TObjects (`kNotDeleted | kIsOnHeap`).
pub const TOBJECT_BITS: u32 = 0x0300_0000;

/// A growable big-endian output buffer.
pub struct WBuffer {
    data: Vec<u8>,
    origin: usize,
    classes: HashMap<String, u32>,
}

impl WBuffer {
    /// Create a buffer whose first byte sits `origin` bytes into ROOT's
    /// object buffer (the key header length for keyed objects).
    pub fn new(origin: usize) -> Self {
        Self { data: Vec::new(), origin, classes: HashMap::new() }
    }

    /// Current write position (bytes written so far).
    #[inline]
    pub fn pos(&self) -> usize {
        self.data.len()
    }

    /// Written bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the buffer.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    /// Append raw bytes.
    pub fn put_bytes(&mut self, b: &[u8]) {
        self.data.extend_from_slice(b);
    }

    /// Append a byte.
    pub fn put_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    /// Append a big-endian u16.
    pub fn put_u16(&mut self, v: u16) {
        self.put_bytes(&v.to_be_bytes());
    }

    /// Append a big-endian i16.
    pub fn put_i16(&mut self, v: i16) {
        self.put_bytes(&v.to_be_bytes());
    }

    /// Append a big-endian u32.
    pub fn put_u32(&mut self, v: u32) {
        self.put_bytes(&v.to_be_bytes());
    }

    /// Append a big-endian i32.
    pub fn put_i32(&mut self, v: i32) {
        self.put_bytes(&v.to_be_bytes());
    }

    /// Append a big-endian u64.
    pub fn put_u64(&mut self, v: u64) {
        self.put_bytes(&v.to_be_bytes());
    }

    /// Append a big-endian i64.
    pub fn put_i64(&mut self, v: i64) {
        self.put_bytes(&v.to_be_bytes());
    }

    /// Append a big-endian f32.
    pub fn put_f32(&mut self, v: f32) {
        self.put_bytes(&v.to_be_bytes());
    }

    /// Append a big-endian f64.
    pub fn put_f64(&mut self, v: f64) {
        self.put_bytes(&v.to_be_bytes());
    }

    /// Append a ROOT TString (1-byte length, or 255 + u32 length).
    pub fn put_string(&mut self, s: &str) {
        let bytes = s.as_bytes();
        if bytes.len() < 255 {
            self.put_u8(bytes.len() as u8);
        } else {
            self.put_u8(255);
            self.put_u32(bytes.len() as u32);
        }
        self.put_bytes(bytes);
    }

    /// Append a NUL-terminated string.
    pub fn put_cstring(&mut self, s: &str) {
        self.put_bytes(s.as_bytes());
        self.put_u8(0);
    }

    /// Reserve a byte count and write `version`. Returns the position to
    /// pass to [`end_version`](Self::end_version).
    pub fn begin_version(&mut self, version: u16) -> usize {
        let at = self.pos();
        self.put_u32(0);
        self.put_u16(version);
        at
    }

    /// Patch the byte count reserved at `at` to cover everything since.
    pub fn end_version(&mut self, at: usize) {
        let count = (self.pos() - at - 4) as u32;
        self.patch_u32(at, count | K_BYTE_COUNT_MASK);
    }

    /// Append a `TObject` header (no byte count, version 1).
    pub fn put_tobject(&mut self) {
        self.put_u16(1);
        self.put_u32(0);
        self.put_u32(TOBJECT_BITS);
    }

    /// Append a `TNamed` with its own byte count.
    pub fn put_tnamed(&mut self, name: &str, title: &str) {
        let at = self.begin_version(1);
        self.put_tobject();
        self.put_string(name);
        self.put_string(title);
        self.end_version(at);
    }

    /// Start a polymorphic object (`WriteObjectAny`): byte count plus class
    /// tag, registering the class name on first use.
    ///
    /// Returns the object start; its reference tag is
    /// [`object_tag`](Self::object_tag)`(start)`.
    pub fn begin_object(&mut self, class_name: &str) -> usize {
        let at = self.pos();
        self.put_u32(0);
        if let Some(&tag) = self.classes.get(class_name) {
            self.put_u32(tag | K_CLASS_MASK);
        } else {
            let tag = (self.pos() + self.origin + K_MAP_OFFSET) as u32;
            self.put_u32(K_NEW_CLASS_TAG);
            self.put_cstring(class_name);
            self.classes.insert(class_name.to_string(), tag);
        }
        at
    }

    /// Close an object opened with [`begin_object`](Self::begin_object).
    pub fn end_object(&mut self, at: usize) {
        self.end_version(at);
    }

    /// Reference tag of the object that starts at `at`.
    pub fn object_tag(&self, at: usize) -> u32 {
        (at + self.origin + K_MAP_OFFSET) as u32
    }

    /// Append a null object pointer.
    pub fn put_null(&mut self) {
        self.put_u32(0);
    }

    /// Overwrite 4 bytes at `pos`.
    pub fn patch_u32(&mut self, pos: usize, v: u32) {
        self.data[pos..pos + 4].copy_from_slice(&v.to_be_bytes());
    }
}

/// Overwrite a big-endian i32 inside an existing byte slice.
pub fn patch_i32(buf: &mut [u8], pos: usize, v: i32) {
    buf[pos..pos + 4].copy_from_slice(&v.to_be_bytes());
}

/// Overwrite a big-endian i64 inside an existing byte slice.
pub fn patch_i64(buf: &mut [u8], pos: usize, v: i64) {
    buf[pos..pos + 8].copy_from_slice(&v.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbuffer::RBuffer;

    #[test]
    fn version_bytecount_matches_reader() {
        let mut w = WBuffer::new(0);
        let at = w.begin_version(7);
        w.put_i32(42);
        w.end_version(at);

        let bytes = w.into_inner();
        let mut r = RBuffer::new(&bytes);
        let (ver, end) = r.read_version().unwrap();
        assert_eq!(ver, 7);
        assert_eq!(end, Some(bytes.len()));
        assert_eq!(r.read_i32().unwrap(), 42);
    }

    #[test]
    fn tnamed_round_trip() {
        let mut w = WBuffer::new(0);
        w.put_tnamed("AnalysisTree", "events");
        let bytes = w.into_inner();
        let mut r = RBuffer::new(&bytes);
        assert_eq!(r.read_tnamed().unwrap(), ("AnalysisTree".to_string(), "events".to_string()));
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn second_use_of_class_is_a_reference() {
        let mut w = WBuffer::new(100);
        let first = w.begin_object("TLeafF");
        w.end_object(first);
        let second = w.begin_object("TLeafF");
        w.end_object(second);

        let bytes = w.as_bytes();
        let tag = u32::from_be_bytes(bytes[second + 4..second + 8].try_into().unwrap());
        assert_eq!(tag & K_CLASS_MASK, K_CLASS_MASK);
        // class tag word of the first object sits at 4, displaced by 100, plus kMapOffset
        assert_eq!(tag & !K_CLASS_MASK, 106);
        assert_eq!(w.object_tag(first), 102);
    }

    #[test]
    fn long_strings_use_extended_length() {
        let mut w = WBuffer::new(0);
        let s = "y".repeat(256);
        w.put_string(&s);
        let bytes = w.into_inner();
        assert_eq!(bytes[0], 255);
        let mut r = RBuffer::new(&bytes);
        assert_eq!(r.read_string().unwrap(), s);
    }
}
