//! high-level operations on depots and containers

mod analyze;
mod extract;
mod fsck;
mod rebuild;

pub use analyze::{analyze, analyze_path, AnalyzeOptions, Analysis};
pub use extract::{extract_all, ExtractReport};
pub use fsck::{fsck, CorruptObject, FsckOptions, FsckReport};
pub use rebuild::{rebuild_from_depot, rebuild_set, RebuildReport};

use crate::error::Error;

/// one entry that failed during a bulk operation
#[derive(Debug)]
pub struct EntryFailure {
    pub entry: String,
    pub error: Error,
}
