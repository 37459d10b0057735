use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::archive::gzip::{self, GzArchive};
use crate::archive::Archive;
use crate::depot::{depot_path, Depot};
use crate::error::{Error, Result};
use crate::hash::{hash_reader, HashKind, HashKinds, Sha1};

#[derive(Clone, Copy, Debug, Default)]
pub struct FsckOptions {
    /// decompress every object and compare its sha1 with the filename
    pub verify: bool,
}

/// fsck report
#[derive(Debug, Default)]
pub struct FsckReport {
    /// objects checked
    pub objects_checked: usize,
    /// objects stored outside their shard directory
    pub misplaced: Vec<PathBuf>,
    /// objects whose gzip header is not a valid TorrentGZ header
    pub nonstandard: Vec<PathBuf>,
    /// objects whose content does not match their name
    pub corrupt: Vec<CorruptObject>,
    /// files in the depot that are not named like objects
    pub unknown: Vec<PathBuf>,
}

impl FsckReport {
    pub fn is_ok(&self) -> bool {
        self.misplaced.is_empty() && self.nonstandard.is_empty() && self.corrupt.is_empty()
    }
}

#[derive(Debug)]
pub struct CorruptObject {
    pub path: PathBuf,
    pub sha1: Sha1,
    pub message: String,
}

/// verify depot integrity
pub fn fsck(depot: &Depot, opts: &FsckOptions) -> Result<FsckReport> {
    let root = depot.path();
    let tmp = depot.tmp_path();
    let config = depot.config_path();
    let depth = depot.config().depth;
    let mut report = FsckReport::default();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.path() != tmp);
    for entry in walker {
        let entry = entry.map_err(|e| Error::Io {
            path: e.path().unwrap_or(root).to_path_buf(),
            source: e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("walkdir error")),
        })?;
        if !entry.file_type().is_file() || entry.path() == config {
            continue;
        }

        let path = entry.path();
        let Some(sha1) = gzip::sha1_from_name(path) else {
            debug!(path = %path.display(), "not a depot object");
            report.unknown.push(path.to_path_buf());
            continue;
        };
        report.objects_checked += 1;

        if path.strip_prefix(root).ok() != Some(depot_path(&sha1, depth)?.as_path()) {
            warn!(path = %path.display(), "object outside its shard directory");
            report.misplaced.push(path.to_path_buf());
        }

        if !gzip::is_standardized(path)? {
            warn!(path = %path.display(), "object is not a valid torrentgz");
            report.nonstandard.push(path.to_path_buf());
            continue;
        }

        if opts.verify {
            if let Some(message) = verify_object(path, &sha1)? {
                warn!(path = %path.display(), %message, "corrupt object");
                report.corrupt.push(CorruptObject {
                    path: path.to_path_buf(),
                    sha1,
                    message,
                });
            }
        }
    }

    Ok(report)
}

/// decompress an object; Some(message) when it does not hash to its name
fn verify_object(path: &Path, sha1: &Sha1) -> Result<Option<String>> {
    let mut object = match GzArchive::open(path) {
        Ok(object) => object,
        Err(Error::CorruptContainer { reason, .. }) => return Ok(Some(reason)),
        Err(err) => return Err(err),
    };
    let kinds = HashKinds::NONE.with(HashKind::Sha1);
    let hashed = {
        let reader = object.open_entry(0)?;
        hash_reader(reader, kinds)
    };
    match hashed {
        Ok((hashes, _)) if hashes.sha1.as_ref() == Some(sha1) => Ok(None),
        Ok((hashes, _)) => Ok(Some(format!(
            "content hashes to {}",
            hashes.sha1.map(|h| h.to_hex()).unwrap_or_default()
        ))),
        Err(err) => Ok(Some(err.to_string())),
    }
}
