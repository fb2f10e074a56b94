//! ROOT object serialization: TTree metadata in both directions.

mod ttree;
mod ttree_out;

pub use ttree::read_ttree;
pub use ttree_out::{
    BranchSpec, DEFAULT_ENTRY_OFFSET_LEN, LeafSpec, TreeSpec, write_empty_tlist, write_ttree,
};
