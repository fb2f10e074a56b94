//! # ntk-root
//!
//! Native ROOT file reader and writer for the ntk ntuple tools.
//!
//! Reads TTree metadata and baskets from `.root` files, counts entries either
//! from the cached `fEntries` or by visiting every entry, and deep-copies a
//! tree into a new file at another compression setting. No ROOT installation
//! is needed. Reads zlib, LZ4, ZSTD and XZ blocks; writes zlib, ZSTD and XZ.
//!
//! ## Example
//!
//! ```no_run
//! use ntk_root::{CompressionSetting, RootFile, RootWriter, clone_tree, count_entries_slow};
//!
//! let src = RootFile::open("ntuple.root").unwrap();
//! println!("{} entries", count_entries_slow(&src, "AnalysisTree").unwrap());
//!
//! let mut dest = RootWriter::create("ntuple_lzma.root", CompressionSetting::MAX).unwrap();
//! clone_tree(&src, "AnalysisTree", &mut dest).unwrap();
//! dest.close().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod basket;
pub mod branch_reader;
pub mod clone;
pub mod compress;
pub mod cursor;
pub mod datasource;
pub mod decompress;
pub mod directory;
pub mod error;
pub mod file;
pub mod key;
pub mod objects;
pub mod rbuffer;
pub mod tree;
pub mod tree_writer;
pub mod wbuffer;
pub mod writer;

pub use branch_reader::{BranchReader, JaggedCol};
pub use clone::{CloneOptions, CloneSummary, clone_tree, clone_tree_with};
pub use compress::{Algorithm, CompressionSetting};
pub use cursor::{EntryCursor, count_entries_fast, count_entries_slow, visit_entries};
pub use error::{Result, RootError};
pub use file::RootFile;
pub use key::KeyInfo;
pub use tree::{BranchInfo, LeafInfo, LeafType, Tree};
pub use tree_writer::{Shape, TreeWriter, Values};
pub use writer::RootWriter;
