//! duplicate detection and merging over hash records
//!
//! equality is conditional: two records are the same artifact when they
//! share at least one digest and every shared digest agrees (see
//! [`HashRecord::same_artifact`](crate::types::HashRecord::same_artifact)).
//! a scan that computed only crc32 and md5 therefore still recognizes an
//! artifact cataloged by md5 and sha1.

mod merge;
mod names;
mod sort;

pub use merge::{merge, merge_collections};
pub use names::resolve_names;
pub use sort::sort_records;
