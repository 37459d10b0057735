use std::path::Path;

use tracing::{debug, warn};

use super::EntryFailure;
use crate::archive::entry_reader::entry_error;
use crate::archive::{self, archive_empty_folders, gzip, Archive, ArchiveKind};
use crate::config::{BulkPolicy, Config};
use crate::error::Result;
use crate::hash::{hash_reader, HashKinds, Hashes};
use crate::types::{DosDateTime, HashRecord};

/// options for analyzing a container
#[derive(Clone, Copy, Debug)]
pub struct AnalyzeOptions {
    /// digests to compute per entry; crc32 alone reads only the entry table
    pub hashes: HashKinds,
    pub policy: BulkPolicy,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            hashes: HashKinds::STANDARD,
            policy: BulkPolicy::FailOnAny,
        }
    }
}

impl From<&Config> for AnalyzeOptions {
    fn from(config: &Config) -> Self {
        Self {
            hashes: config.hash_kinds(),
            policy: config.on_entry_error,
        }
    }
}

/// what a container holds
#[derive(Debug, Default)]
pub struct Analysis {
    /// one record per file entry, in container order
    pub records: Vec<HashRecord>,
    /// directory markers with nothing beneath them
    pub empty_folders: Vec<String>,
    /// entries that could not be read
    pub failures: Vec<EntryFailure>,
    /// the container already has its canonical layout
    pub standardized: bool,
}

/// catalog date string for an entry stamp
fn entry_date(modified: Option<DosDateTime>) -> Option<String> {
    modified
        .and_then(DosDateTime::to_naive)
        .map(|dt| dt.format("%Y/%m/%d %H:%M:%S").to_string())
}

fn hash_entry(
    archive: &mut dyn Archive,
    index: usize,
    name: &str,
    kinds: HashKinds,
) -> Result<(Hashes, u64)> {
    let path = archive.path().to_path_buf();
    let reader = archive.open_entry(index)?;
    hash_reader(reader, kinds).map_err(|e| entry_error(&path, name, e))
}

/// produce hash records for every file entry of an open container
///
/// unreadable entries are logged and collected in `failures`; whether they
/// fail the whole call is decided by `opts.policy`.
pub fn analyze(archive: &mut dyn Archive, group: &str, opts: &AnalyzeOptions) -> Result<Analysis> {
    let entries = archive.entries().to_vec();
    let quick = opts.hashes.is_crc_only()
        && entries
            .iter()
            .all(|e| e.is_directory() || e.crc32.is_some());

    let mut analysis = Analysis {
        empty_folders: archive_empty_folders(archive),
        standardized: archive.is_standardized(),
        ..Default::default()
    };

    let mut files = 0;
    for (index, entry) in entries.iter().enumerate() {
        if entry.is_directory() {
            continue;
        }
        files += 1;

        let mut record = HashRecord::from_entry(entry, group);
        record.date = entry_date(entry.modified);
        if quick {
            analysis.records.push(record);
            continue;
        }

        match hash_entry(archive, index, &entry.path, opts.hashes) {
            Ok((mut hashes, size)) => {
                // the stream already checked the table crc
                hashes.crc32 = hashes.crc32.or(entry.crc32);
                record.hashes = hashes;
                record.size = Some(size);
                analysis.records.push(record);
            }
            Err(err) if err.is_recoverable() => {
                warn!(container = %archive.path().display(), entry = %entry.path, error = %err, "skipping unreadable entry");
                analysis.failures.push(EntryFailure {
                    entry: entry.path.clone(),
                    error: err,
                });
            }
            Err(err) => return Err(err),
        }
    }

    debug!(
        container = %archive.path().display(),
        files,
        failed = analysis.failures.len(),
        quick,
        "analyzed container"
    );
    opts.policy.check(analysis.failures.len(), files)?;
    Ok(analysis)
}

/// open and analyze a container file, naming the group after the file stem
///
/// a crc32-only scan of a gzip file reads just its header and trailer.
pub fn analyze_path(path: &Path, opts: &AnalyzeOptions) -> Result<Analysis> {
    let group = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();

    let kind = ArchiveKind::detect(path)?;
    if kind == ArchiveKind::TorrentGz && opts.hashes.is_crc_only() {
        let (crc, size) = gzip::quick_scan(path)?;
        let mut record = HashRecord::new(group.clone(), group).with_size(size);
        record.hashes.crc32 = Some(crc);
        return Ok(Analysis {
            records: vec![record],
            standardized: gzip::is_standardized(path)?,
            ..Default::default()
        });
    }

    let mut archive = archive::open(path)?;
    let analysis = analyze(archive.as_mut(), &group, opts)?;
    archive.close()?;
    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{write_container, ContainerFormat, EntrySource, NewEntry, WriteOptions};
    use crate::depot::Depot;
    use crate::error::Error;
    use crate::hash::{hash_bytes, Crc32, HashKind};
    use std::fs;
    use tempfile::tempdir;

    fn build_zip(dir: &Path) -> std::path::PathBuf {
        let dest = dir.join("set.zip");
        let entries = vec![
            NewEntry::new(
                HashRecord::new("b.bin", "set"),
                EntrySource::Reader(Box::new(&b"second"[..])),
            ),
            NewEntry::new(
                HashRecord::new("a.bin", "set"),
                EntrySource::Reader(Box::new(&b"first"[..])),
            ),
            NewEntry::new(HashRecord::new("empty", "set"), EntrySource::Directory),
        ];
        write_container(&dest, ContainerFormat::Zip, entries, &WriteOptions::default()).unwrap();
        dest
    }

    #[test]
    fn test_analyze_zip() {
        let dir = tempdir().unwrap();
        let path = build_zip(dir.path());

        let analysis = analyze_path(&path, &AnalyzeOptions::default()).unwrap();
        assert!(analysis.standardized);
        assert_eq!(analysis.empty_folders, vec!["empty/"]);
        assert!(analysis.failures.is_empty());

        let names: Vec<_> = analysis.records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a.bin", "b.bin"]);
        let first = &analysis.records[0];
        assert_eq!(first.parent(), "set");
        assert_eq!(first.size, Some(5));
        assert_eq!(first.hashes, hash_bytes(b"first", HashKinds::STANDARD));
    }

    #[test]
    fn test_quick_scan_uses_table() {
        let dir = tempdir().unwrap();
        let path = build_zip(dir.path());
        let opts = AnalyzeOptions {
            hashes: HashKinds::CRC_ONLY,
            ..Default::default()
        };

        let analysis = analyze_path(&path, &opts).unwrap();
        let record = &analysis.records[1];
        assert_eq!(record.hashes.crc32, hash_bytes(b"second", HashKinds::CRC_ONLY).crc32);
        assert!(record.hashes.md5.is_none());
    }

    #[test]
    fn test_quick_scan_gzip() {
        let dir = tempdir().unwrap();
        let depot = Depot::init(&dir.path().join("depot"), 1).unwrap();
        let written = depot.add(&b"payload"[..]).unwrap();

        let opts = AnalyzeOptions {
            hashes: HashKinds::CRC_ONLY,
            ..Default::default()
        };
        let analysis = analyze_path(&written.path, &opts).unwrap();
        assert!(analysis.standardized);
        assert_eq!(analysis.records.len(), 1);
        assert_eq!(analysis.records[0].name, written.sha1.to_hex());
        assert_eq!(analysis.records[0].size, Some(7));
        assert_eq!(analysis.records[0].hashes.crc32, written.hashes.crc32);

        let full = AnalyzeOptions {
            hashes: HashKinds::CRC_ONLY.with(HashKind::Sha1),
            ..Default::default()
        };
        let analysis = analyze_path(&written.path, &full).unwrap();
        assert_eq!(analysis.records[0].hashes.sha1, Some(written.sha1));
    }

    #[test]
    fn test_corrupt_entry_isolated_or_fatal() {
        let dir = tempdir().unwrap();
        let path = build_zip(dir.path());

        // flip a byte inside the deflate data of the first entry
        let mut bytes = fs::read(&path).unwrap();
        let data_start = 30 + "a.bin".len();
        bytes[data_start + 1] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        let strict = analyze_path(&path, &AnalyzeOptions::default());
        assert!(matches!(
            strict,
            Err(Error::BulkFailure {
                failed: 1,
                total: 2
            })
        ));

        let lenient = AnalyzeOptions {
            policy: BulkPolicy::SucceedIfAny,
            ..Default::default()
        };
        let analysis = analyze_path(&path, &lenient).unwrap();
        assert_eq!(analysis.failures.len(), 1);
        assert_eq!(analysis.failures[0].entry, "a.bin");
        assert_eq!(analysis.records.len(), 1);
        assert_eq!(analysis.records[0].name, "b.bin");
    }

    /// raise the declared size of `name` in the central directory so its
    /// stream runs out before the table says it should
    fn declare_longer(path: &Path, name: &str, extra: u32) {
        let mut bytes = fs::read(path).unwrap();
        let at = (0..bytes.len() - 46)
            .find(|&i| bytes[i..].starts_with(b"PK\x01\x02") && bytes[i + 46..].starts_with(name.as_bytes()))
            .unwrap();
        let size = u32::from_le_bytes(bytes[at + 24..at + 28].try_into().unwrap());
        bytes[at + 24..at + 28].copy_from_slice(&(size + extra).to_le_bytes());
        fs::write(path, &bytes).unwrap();
    }

    #[test]
    fn test_short_entry_reported_as_truncated() {
        let dir = tempdir().unwrap();
        let path = build_zip(dir.path());
        declare_longer(&path, "a.bin", 100);

        let lenient = AnalyzeOptions {
            policy: BulkPolicy::SucceedIfAny,
            ..Default::default()
        };
        let analysis = analyze_path(&path, &lenient).unwrap();
        assert_eq!(analysis.failures.len(), 1);
        assert_eq!(analysis.failures[0].entry, "a.bin");
        assert!(matches!(
            &analysis.failures[0].error,
            Error::TruncatedEntry { entry, .. } if entry == "a.bin"
        ));
        assert_eq!(analysis.records.len(), 1);
        assert_eq!(analysis.records[0].name, "b.bin");
        assert_eq!(
            analysis.records[0].hashes,
            hash_bytes(b"second", HashKinds::STANDARD)
        );

        let strict = analyze_path(&path, &AnalyzeOptions::default());
        assert!(matches!(
            strict,
            Err(Error::BulkFailure {
                failed: 1,
                total: 2
            })
        ));
    }

    #[test]
    fn test_entry_dates_become_record_dates() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("dated.zip");
        let record = HashRecord::new("a.bin", "dated").with_date("2001/02/03 04:05:06");
        write_container(
            &dest,
            ContainerFormat::Zip,
            vec![NewEntry::new(record, EntrySource::Reader(Box::new(&b"x"[..])))],
            &WriteOptions { real_dates: true },
        )
        .unwrap();

        let analysis = analyze_path(&dest, &AnalyzeOptions::default()).unwrap();
        assert_eq!(analysis.records[0].date.as_deref(), Some("2001/02/03 04:05:06"));
        assert_eq!(
            analysis.records[0].hashes.crc32,
            Some(Crc32::from_u32(crc32fast::hash(b"x")))
        );
    }
}
