mod entry;
mod record;

pub use entry::{ArchiveEntry, DosDateTime};
pub use record::{DupeMatch, DupeScope, DupeType, Group, HashRecord, ItemStatus};
