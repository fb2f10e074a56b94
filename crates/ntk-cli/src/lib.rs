//! Shared pieces of the ntk command-line tools.
//!
//! - `copy-compress <source> <destination>`: clone `AnalysisTree` into a new
//!   file at maximum compression.
//! - `count-events <source> <mode>`: print the number of entries of
//!   `AnalysisTree`, cached (`1`) or counted by iteration (anything else).
//! - `plan-copy-jobs <xml>`: prepare HTCondor jobs that copy-compress every
//!   ntuple of a dataset XML into the group area.

pub mod copy;
pub mod count;
pub mod jobs;
pub mod logging;

/// The tree both tools operate on.
pub const ANALYSIS_TREE: &str = "AnalysisTree";
