use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::EntryFailure;
use crate::archive::entry_reader::entry_error;
use crate::archive::Archive;
use crate::config::BulkPolicy;
use crate::error::{Error, IoResultExt, Result};
use crate::fs::TempTarget;

/// extraction report
#[derive(Debug, Default)]
pub struct ExtractReport {
    /// files written
    pub files: usize,
    /// directory markers created
    pub directories: usize,
    /// entries that could not be extracted
    pub failures: Vec<EntryFailure>,
}

impl ExtractReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// map an entry path onto `dest`, refusing anything that escapes it
fn safe_join(dest: &Path, name: &str) -> Option<PathBuf> {
    if name.starts_with('/') || name.starts_with('\\') {
        return None;
    }
    let mut out = dest.to_path_buf();
    let mut pushed = false;
    for part in name.split(['/', '\\']) {
        match part {
            "" | "." => continue,
            ".." => return None,
            p if p.contains(':') => return None,
            p => {
                out.push(p);
                pushed = true;
            }
        }
    }
    pushed.then_some(out)
}

/// stream one entry into a temp file next to `target`, then move it into place
fn extract_entry(archive: &mut dyn Archive, index: usize, name: &str, target: &Path) -> Result<()> {
    let parent = target.parent().unwrap_or(Path::new("."));
    let stem = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("entry");
    let mut tmp = TempTarget::create_in(parent, stem)?;

    let path = archive.path().to_path_buf();
    {
        let mut reader = archive.open_entry(index)?;
        io::copy(&mut reader, tmp.file_mut()).map_err(|e| entry_error(&path, name, e))?;
    }
    tmp.commit(target)
}

/// extract every entry of `archive` below `dest`
///
/// failed files never leave partial output. directory markers are created
/// as directories and do not count toward the policy.
pub fn extract_all(archive: &mut dyn Archive, dest: &Path, policy: BulkPolicy) -> Result<ExtractReport> {
    fs::create_dir_all(dest).with_path(dest)?;

    let container = archive.path().to_path_buf();
    let entries = archive.entries().to_vec();
    let mut report = ExtractReport::default();
    let mut total = 0;

    for (index, entry) in entries.iter().enumerate() {
        let Some(target) = safe_join(dest, &entry.path) else {
            warn!(container = %container.display(), entry = %entry.path, "refusing entry path outside the destination");
            total += 1;
            report.failures.push(EntryFailure {
                entry: entry.path.clone(),
                error: Error::corrupt(&container, format!("unsafe entry path {}", entry.path)),
            });
            continue;
        };

        if entry.is_directory() {
            fs::create_dir_all(&target).with_path(&target)?;
            report.directories += 1;
            continue;
        }

        total += 1;
        match extract_entry(archive, index, &entry.path, &target) {
            Ok(()) => {
                debug!(entry = %entry.path, "extracted");
                report.files += 1;
            }
            Err(err) if err.is_recoverable() => {
                warn!(container = %container.display(), entry = %entry.path, error = %err, "failed to extract entry");
                report.failures.push(EntryFailure {
                    entry: entry.path.clone(),
                    error: err,
                });
            }
            Err(err) => return Err(err),
        }
    }

    policy.check(report.failures.len(), total)?;
    Ok(report)
}
