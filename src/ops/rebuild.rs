use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::archive::{write_container, ContainerFormat, EntrySource, NewEntry, WriteOptions, WriteOutcome};
use crate::dedup::{resolve_names, sort_records};
use crate::depot::Depot;
use crate::error::{Error, IoResultExt, Result};
use crate::types::HashRecord;

/// result of rebuilding one group from a depot
#[derive(Debug)]
pub struct RebuildReport {
    /// the container for the group
    pub path: PathBuf,
    pub outcome: WriteOutcome,
    /// records that could not be sourced from the depot
    pub missing: Vec<HashRecord>,
}

impl RebuildReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// container file name for a group; groups are flat, so separators are refused
fn container_name(group: &str, format: ContainerFormat) -> Result<String> {
    if group.is_empty()
        || group == "."
        || group == ".."
        || group.contains(['/', '\\', ':', '\0'])
    {
        return Err(Error::InvalidGroupName(group.to_string()));
    }
    Ok(format!("{}.{}", group, format.extension()))
}

/// write the entries of one group into `<dest_dir>/<group>.<ext>`
///
/// entries are sorted and their names resolved first, so true duplicates
/// collapse and colliding names get suffixed. an existing container is
/// extended in place.
pub fn rebuild_set(
    dest_dir: &Path,
    group: &str,
    format: ContainerFormat,
    mut entries: Vec<NewEntry>,
    opts: &WriteOptions,
) -> Result<(PathBuf, WriteOutcome)> {
    let name = container_name(group, format)?;
    sort_records(&mut entries);
    let entries = resolve_names(entries);

    fs::create_dir_all(dest_dir).with_path(dest_dir)?;
    let dest = dest_dir.join(name);
    let outcome = write_container(&dest, format, entries, opts)?;
    Ok((dest, outcome))
}

/// rebuild a group whose payloads live in `depot`
///
/// each record is located by its sha1; nodumps and records without a sha1
/// or without a stored object are reported as missing.
pub fn rebuild_from_depot(
    depot: &Depot,
    dest_dir: &Path,
    group: &str,
    format: ContainerFormat,
    records: Vec<HashRecord>,
) -> Result<RebuildReport> {
    let mut entries = Vec::with_capacity(records.len());
    let mut missing = Vec::new();

    for record in records {
        let sha1 = match record.hashes.sha1 {
            Some(sha1) if !record.is_nodump() => sha1,
            _ => {
                missing.push(record);
                continue;
            }
        };
        let path = depot.path_for(&sha1)?;
        if !path.is_file() {
            warn!(group, name = %record.name, sha1 = %sha1, "payload not in depot");
            missing.push(record);
            continue;
        }
        entries.push(NewEntry::new(record, EntrySource::Archive { path, index: 0 }));
    }

    let opts = WriteOptions {
        real_dates: depot.config().real_dates,
    };
    let (path, outcome) = rebuild_set(dest_dir, group, format, entries, &opts)?;
    if !missing.is_empty() {
        info!(group, missing = missing.len(), "group rebuilt incomplete");
    }
    Ok(RebuildReport {
        path,
        outcome,
        missing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{open, Archive};
    use crate::hash::{hash_bytes, HashKinds};
    use crate::types::ItemStatus;
    use std::io::Read;
    use tempfile::tempdir;

    fn record(name: &str, data: &[u8]) -> HashRecord {
        HashRecord::new(name, "set")
            .with_size(data.len() as u64)
            .with_hashes(hash_bytes(data, HashKinds::STANDARD))
    }

    fn contents(archive: &mut dyn Archive) -> Vec<(String, Vec<u8>)> {
        let entries = archive.entries().to_vec();
        entries
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let mut data = Vec::new();
                archive.open_entry(i).unwrap().read_to_end(&mut data).unwrap();
                (e.path.clone(), data)
            })
            .collect()
    }

    #[test]
    fn test_rebuild_from_depot() {
        let dir = tempdir().unwrap();
        let depot = Depot::init(&dir.path().join("depot"), 2).unwrap();
        depot.add(&b"alpha"[..]).unwrap();
        depot.add(&b"beta"[..]).unwrap();

        let records = vec![
            record("rom2.bin", b"beta"),
            record("rom10.bin", b"alpha"),
            record("gone.bin", b"never stored"),
            HashRecord::new("nodump.bin", "set").with_status(ItemStatus::Nodump),
        ];
        let out = dir.path().join("out");

        for format in [ContainerFormat::Zip, ContainerFormat::SevenZip] {
            let report =
                rebuild_from_depot(&depot, &out, "set", format, records.clone()).unwrap();
            assert_eq!(report.outcome, WriteOutcome::Written);
            assert_eq!(report.path, out.join(format!("set.{}", format.extension())));
            let missing: Vec<_> = report.missing.iter().map(|r| r.name.as_str()).collect();
            assert_eq!(missing, vec!["gone.bin", "nodump.bin"]);

            let mut archive = open(&report.path).unwrap();
            assert!(archive.is_standardized());
            assert_eq!(
                contents(archive.as_mut()),
                vec![
                    ("rom2.bin".to_string(), b"beta".to_vec()),
                    ("rom10.bin".to_string(), b"alpha".to_vec()),
                ]
            );
        }
    }

    #[test]
    fn test_rebuild_twice_is_noop() {
        let dir = tempdir().unwrap();
        let depot = Depot::init(&dir.path().join("depot"), 1).unwrap();
        depot.add(&b"alpha"[..]).unwrap();
        let records = vec![record("a.bin", b"alpha")];

        let first =
            rebuild_from_depot(&depot, dir.path(), "set", ContainerFormat::Zip, records.clone())
                .unwrap();
        let bytes = fs::read(&first.path).unwrap();
        let second =
            rebuild_from_depot(&depot, dir.path(), "set", ContainerFormat::Zip, records).unwrap();

        assert_eq!(second.outcome, WriteOutcome::Unchanged);
        assert_eq!(fs::read(&second.path).unwrap(), bytes);
    }

    #[test]
    fn test_group_names_stay_inside_destination() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out");
        for group in ["../escape", "a/b", "a\\b", "c:set", "..", ""] {
            let entries = vec![NewEntry::new(
                record("a.bin", b"one"),
                EntrySource::Reader(Box::new(&b"one"[..])),
            )];
            let result = rebuild_set(&out, group, ContainerFormat::Zip, entries, &WriteOptions::default());
            assert!(matches!(result, Err(Error::InvalidGroupName(ref g)) if g == group));
        }
        assert!(!dir.path().join("escape.zip").exists());
        assert!(!out.exists());

        let depot = Depot::init(&dir.path().join("depot"), 1).unwrap();
        depot.add(&b"one"[..]).unwrap();
        let result = rebuild_from_depot(
            &depot,
            &out,
            "../escape",
            ContainerFormat::SevenZip,
            vec![record("a.bin", b"one")],
        );
        assert!(matches!(result, Err(Error::InvalidGroupName(_))));
        assert!(!dir.path().join("escape.7z").exists());
    }

    #[test]
    fn test_rebuild_set_resolves_names() {
        let dir = tempdir().unwrap();
        let entry = |name: &str, data: &'static [u8]| {
            NewEntry::new(record(name, data), EntrySource::Reader(Box::new(data)))
        };
        let entries = vec![
            entry("rom.bin", b"one"),
            entry("rom.bin", b"two"),
            entry("rom.bin", b"one"),
        ];

        let (path, outcome) = rebuild_set(
            dir.path(),
            "set",
            ContainerFormat::Zip,
            entries,
            &WriteOptions::default(),
        )
        .unwrap();
        assert_eq!(outcome, WriteOutcome::Written);

        let archive = open(&path).unwrap();
        let names: Vec<_> = archive.entries().iter().map(|e| e.path.clone()).collect();
        let two_crc = hash_bytes(b"two", HashKinds::CRC_ONLY).crc32.unwrap().to_hex();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"rom.bin".to_string()));
        assert!(names.contains(&format!("rom_{}.bin", two_crc)));
    }
}
