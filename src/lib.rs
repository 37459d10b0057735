//! romdepot - canonical archive engine for preserved binary artifacts
//!
//! reads and writes byte-reproducible containers, stores payloads in a
//! sharded content-addressed depot, and merges hash records from several
//! catalogs into one deduplicated set.
//!
//! # Core concepts
//!
//! - **TorrentGZ**: a single payload gzip whose header carries its md5, crc32
//!   and 64-bit size, named after its sha1
//! - **Depot**: a directory of TorrentGZ files sharded by sha1 prefix
//! - **TorrentZip / Torrent7z**: multi-entry containers whose bytes are fully
//!   determined by their entries, so the same set always produces the same file
//! - **HashRecord**: the identity of one artifact: name, group, size and any
//!   subset of crc32/md5/sha1/sha256/sha384/sha512
//!
//! # Hash equality
//!
//! records are compared conditionally: algorithms missing on either side are
//! ignored, and at least one algorithm must be present on both.
//!
//! # Example usage
//!
//! ```no_run
//! use romdepot::{ops, Depot};
//! use romdepot::archive::ContainerFormat;
//! use std::path::Path;
//!
//! // initialize a depot and store a file
//! let depot = Depot::init(Path::new("/path/to/depot"), 4).unwrap();
//! let stored = depot.add_file(Path::new("rom.bin")).unwrap();
//!
//! // rebuild a set from the depot into a TorrentZip
//! let record = romdepot::HashRecord::new("rom.bin", "game").with_hashes(stored.hashes);
//! ops::rebuild_from_depot(&depot, Path::new("/out"), "game", ContainerFormat::Zip, vec![record])
//!     .unwrap();
//! ```

mod config;
mod error;

pub mod archive;
pub mod dedup;
pub mod depot;
pub mod fs;
pub mod hash;
pub mod natural;
pub mod ops;
pub mod types;

pub use archive::{open, Archive, ArchiveKind, WriteOutcome};
pub use config::{BulkPolicy, Config, DEFAULT_DEPTH};
pub use depot::Depot;
pub use error::{Error, IoResultExt, Result};
pub use hash::{Checksum, Crc32, HashKind, HashKinds, Hashes, Md5, Sha1, Sha256, Sha384, Sha512};
pub use types::{ArchiveEntry, DosDateTime, DupeMatch, DupeScope, DupeType, Group, HashRecord, ItemStatus};
