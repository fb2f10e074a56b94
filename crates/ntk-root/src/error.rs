//! Error types for ROOT file reading and writing.

use thiserror::Error;

/// Errors that can occur reading or writing ROOT files.
#[derive(Error, Debug)]
pub enum RootError {
    /// I/O error reading or writing the file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid ROOT file magic bytes.
    #[error("not a ROOT file (bad magic)")]
    BadMagic,

    /// Buffer underflow (tried to read past end).
    #[error("unexpected end of buffer at offset {offset}, need {need} bytes, have {have}")]
    BufferUnderflow {
        /// Current offset in buffer.
        offset: usize,
        /// Bytes requested.
        need: usize,
        /// Bytes remaining.
        have: usize,
    },

    /// Key not found in directory.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Tree not found in file.
    #[error("tree not found: {0}")]
    TreeNotFound(String),

    /// Branch not found in tree.
    #[error("branch not found: {0}")]
    BranchNotFound(String),

    /// Unsupported object class.
    #[error("unsupported class: {0}")]
    UnsupportedClass(String),

    /// A valid structure this implementation cannot handle.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Decompression failure.
    #[error("decompression error: {0}")]
    Decompression(String),

    /// Compression failure.
    #[error("compression error: {0}")]
    Compression(String),

    /// Object deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Type mismatch (e.g. requesting f64 from an opaque object branch).
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Record counts disagree between branches, baskets or metadata.
    #[error("entry mismatch: {0}")]
    EntryMismatch(String),
}

/// Result alias for ROOT operations.
pub type Result<T> = std::result::Result<T, RootError>;
