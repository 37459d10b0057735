//! canonical multi-entry writer shared by the zip and 7z containers
//!
//! both the fresh and the incremental path funnel through
//! [`write_container`]: the union of the old container's entries and the new
//! entries is sorted with the natural comparer and streamed into a temp file
//! next to the destination, which replaces the destination only once the
//! sink has finished cleanly.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::archive::entry_reader::entry_error;
use crate::archive::sevenzip::{SevenZipArchive, SevenZipWriter};
use crate::archive::zip::{ZipArchive, ZipWriter};
use crate::archive::Archive;
use crate::error::{Error, IoResultExt, Result};
use crate::fs::TempTarget;
use crate::hash::{HashKind, HashKinds, Hashes};
use crate::natural::sort_natural;
use crate::types::{DosDateTime, HashRecord};

/// digests and size of an entry as it went into a sink
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WrittenEntry {
    pub hashes: Hashes,
    pub size: u64,
}

/// a container being written entry by entry, in final order
///
/// callers feed entries already sorted; the sink only lays them out.
pub trait EntrySink {
    /// compress one file from `source`, hashing it with `kinds` (crc32 is always computed)
    fn add_file(
        &mut self,
        name: &str,
        modified: Option<DosDateTime>,
        kinds: HashKinds,
        source: &mut dyn Read,
    ) -> io::Result<WrittenEntry>;

    /// a directory marker; `name` ends with `/`
    fn add_directory(&mut self, name: &str, modified: Option<DosDateTime>) -> io::Result<()>;

    /// write the trailing tables; no entry may follow
    fn finish(&mut self) -> io::Result<()>;
}

/// multi-entry canonical container formats
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerFormat {
    Zip,
    SevenZip,
}

impl ContainerFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ContainerFormat::Zip => "zip",
            ContainerFormat::SevenZip => "7z",
        }
    }

    /// open an existing container of this format for the incremental path
    pub fn open_existing(self, path: &Path) -> Result<Box<dyn Archive>> {
        Ok(match self {
            ContainerFormat::Zip => Box::new(ZipArchive::open(path)?),
            ContainerFormat::SevenZip => Box::new(SevenZipArchive::open(path)?),
        })
    }

    pub fn sink<'a>(self, out: &'a mut File) -> io::Result<Box<dyn EntrySink + 'a>> {
        Ok(match self {
            ContainerFormat::Zip => Box::new(ZipWriter::new(out)),
            ContainerFormat::SevenZip => Box::new(SevenZipWriter::new(out)?),
        })
    }
}

/// where the bytes of a new entry come from
pub enum EntrySource {
    Reader(Box<dyn Read>),
    File(PathBuf),
    /// one entry of another container, opened only while it is copied
    Archive { path: PathBuf, index: usize },
    Directory,
}

/// an entry to add: its record (name, expected hashes, date) and its content
pub struct NewEntry {
    pub record: HashRecord,
    pub source: EntrySource,
}

impl NewEntry {
    pub fn new(record: HashRecord, source: EntrySource) -> Self {
        Self { record, source }
    }

    /// path inside the container, with `/` separators and a trailing `/` for directories
    pub fn container_path(&self) -> String {
        let mut name = self.record.name.replace('\\', "/");
        if matches!(self.source, EntrySource::Directory) && !name.ends_with('/') {
            name.push('/');
        }
        name
    }
}

impl AsRef<HashRecord> for NewEntry {
    fn as_ref(&self) -> &HashRecord {
        &self.record
    }
}

impl AsMut<HashRecord> for NewEntry {
    fn as_mut(&mut self) -> &mut HashRecord {
        &mut self.record
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct WriteOptions {
    /// stamp entries with record dates instead of the fixed default
    pub real_dates: bool,
}

/// whether a write changed anything on disk
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// everything requested was already present
    Unchanged,
}

#[derive(Clone, Copy, Debug)]
enum Slot {
    Existing(usize),
    New(usize),
}

/// timestamp to store for an entry
fn entry_stamp(real_dates: bool, date: Option<DosDateTime>) -> Option<DosDateTime> {
    date.filter(|_| real_dates)
}

/// the written digests contradict what the record declared
fn check_written(record: &HashRecord, written: &WrittenEntry) -> std::result::Result<(), String> {
    if let Some(size) = record.size {
        if size != written.size {
            return Err(format!("size {} differs from declared {}", written.size, size));
        }
    }
    if !written.hashes.conditional_eq(&record.hashes) {
        return Err("content hashes differ from the record".to_string());
    }
    Ok(())
}

/// write `entries` into the canonical container at `dest`
///
/// when `dest` exists its entries are kept and the new ones merged in; names
/// already present are skipped. returns `Unchanged` without touching the
/// file when nothing new remains.
pub fn write_container(
    dest: &Path,
    format: ContainerFormat,
    entries: Vec<NewEntry>,
    opts: &WriteOptions,
) -> Result<WriteOutcome> {
    let mut existing = if dest.exists() {
        Some(format.open_existing(dest)?)
    } else {
        None
    };

    let mut slots: HashMap<String, Slot> = HashMap::new();
    if let Some(old) = &existing {
        for (i, entry) in old.entries().iter().enumerate() {
            slots.insert(entry.path.clone(), Slot::Existing(i));
        }
    }
    let old_count = slots.len();

    let mut pending: Vec<Option<NewEntry>> = Vec::with_capacity(entries.len());
    for entry in entries {
        let name = entry.container_path();
        match slots.get(&name) {
            Some(Slot::Existing(i)) => {
                let current = existing
                    .as_ref()
                    .map(|old| HashRecord::from_entry(&old.entries()[*i], entry.record.parent()));
                let differs = entry.record.hashes.crc32.is_some()
                    && current.is_some_and(|c| !entry.record.same_artifact(&c));
                if differs {
                    warn!(container = %dest.display(), entry = %name, "entry already present with different content, keeping existing");
                } else {
                    debug!(container = %dest.display(), entry = %name, "entry already present");
                }
            }
            Some(Slot::New(_)) => {
                debug!(container = %dest.display(), entry = %name, "duplicate entry in input, keeping first");
            }
            None => {
                slots.insert(name, Slot::New(pending.len()));
                pending.push(Some(entry));
            }
        }
    }

    if slots.len() == old_count {
        debug!(container = %dest.display(), "nothing to add");
        return Ok(WriteOutcome::Unchanged);
    }

    let mut keys: Vec<String> = slots.keys().cloned().collect();
    sort_natural(&mut keys);

    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let stem = dest
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(format.extension());
    let mut target = TempTarget::create_in(dir, stem)?;
    let tmp_path = target.path().to_path_buf();

    {
        let mut sink = format.sink(target.file_mut()).with_path(&tmp_path)?;
        for key in &keys {
            match slots[key] {
                Slot::Existing(i) => {
                    let Some(old) = existing.as_mut() else {
                        continue;
                    };
                    let old_path = old.path().to_path_buf();
                    let entry = old.entries()[i].clone();
                    let modified = entry_stamp(opts.real_dates, entry.modified);
                    if entry.is_directory() {
                        sink.add_directory(key, modified).with_path(&tmp_path)?;
                    } else {
                        let mut reader = old.open_entry(i)?;
                        sink.add_file(key, modified, HashKinds::CRC_ONLY, &mut reader)
                            .map_err(|e| entry_error(&old_path, key, e))?;
                    }
                }
                Slot::New(i) => {
                    let Some(entry) = pending[i].take() else {
                        continue;
                    };
                    let NewEntry { record, source } = entry;
                    let date = record.date.as_deref().and_then(DosDateTime::parse);
                    let modified = entry_stamp(opts.real_dates, date);
                    let kinds = record.hashes.kinds().with(HashKind::Crc32);

                    let written = match source {
                        EntrySource::Directory => {
                            sink.add_directory(key, modified).with_path(&tmp_path)?;
                            continue;
                        }
                        EntrySource::Reader(mut reader) => sink
                            .add_file(key, modified, kinds, &mut reader)
                            .map_err(|e| entry_error(dest, key, e))?,
                        EntrySource::File(path) => {
                            let mut file = File::open(&path).with_path(&path)?;
                            sink.add_file(key, modified, kinds, &mut file)
                                .map_err(|e| entry_error(&path, key, e))?
                        }
                        EntrySource::Archive { path, index } => {
                            let mut source = crate::archive::open(&path)?;
                            let mut reader = source.open_entry(index)?;
                            sink.add_file(key, modified, kinds, &mut reader)
                                .map_err(|e| entry_error(&path, key, e))?
                        }
                    };
                    check_written(&record, &written).map_err(|reason| Error::ContentMismatch {
                        path: dest.to_path_buf(),
                        entry: key.clone(),
                        reason,
                    })?;
                }
            }
        }
        sink.finish().with_path(&tmp_path)?;
    }

    // release the old handle before its file is replaced
    if let Some(old) = existing.take() {
        old.close()?;
    }
    target.commit(dest)?;
    info!(container = %dest.display(), entries = keys.len(), added = keys.len() - old_count, "container written");
    Ok(WriteOutcome::Written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::open;
    use crate::hash::hash_bytes;
    use tempfile::tempdir;

    fn file(name: &str, data: &'static [u8]) -> NewEntry {
        NewEntry::new(
            HashRecord::new(name, "set"),
            EntrySource::Reader(Box::new(data)),
        )
    }

    fn names(path: &Path) -> Vec<String> {
        open(path)
            .unwrap()
            .entries()
            .iter()
            .map(|e| e.path.clone())
            .collect()
    }

    fn read_entry(path: &Path, name: &str) -> Vec<u8> {
        let mut archive = open(path).unwrap();
        let index = archive
            .entries()
            .iter()
            .position(|e| e.path == name)
            .unwrap();
        let mut out = Vec::new();
        archive.open_entry(index).unwrap().read_to_end(&mut out).unwrap();
        out
    }

    fn sample(order: &[usize]) -> Vec<NewEntry> {
        let all = [
            ("file10.bin", &b"ten"[..]),
            ("file9.bin", &b"nine"[..]),
            ("dir/a.bin", &b"nested"[..]),
            ("empty.bin", &b""[..]),
        ];
        order.iter().map(|&i| file(all[i].0, all[i].1)).collect()
    }

    #[test]
    fn test_idempotent_output_any_input_order() {
        for format in [ContainerFormat::Zip, ContainerFormat::SevenZip] {
            let dir = tempdir().unwrap();
            let a = dir.path().join(format!("a.{}", format.extension()));
            let b = dir.path().join(format!("b.{}", format.extension()));
            let opts = WriteOptions::default();

            write_container(&a, format, sample(&[0, 1, 2, 3]), &opts).unwrap();
            write_container(&b, format, sample(&[3, 2, 1, 0]), &opts).unwrap();

            assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
            assert_eq!(
                names(&a),
                vec!["dir/a.bin", "empty.bin", "file9.bin", "file10.bin"]
            );
            assert!(open(&a).unwrap().is_standardized());
        }
    }

    #[test]
    fn test_incremental_noop_leaves_file_untouched() {
        for format in [ContainerFormat::Zip, ContainerFormat::SevenZip] {
            let dir = tempdir().unwrap();
            let dest = dir.path().join(format!("set.{}", format.extension()));
            let opts = WriteOptions::default();

            write_container(&dest, format, sample(&[0, 1]), &opts).unwrap();
            let before = std::fs::read(&dest).unwrap();

            let outcome = write_container(&dest, format, sample(&[1]), &opts).unwrap();
            assert_eq!(outcome, WriteOutcome::Unchanged);
            assert_eq!(std::fs::read(&dest).unwrap(), before);
        }
    }

    #[test]
    fn test_incremental_add_matches_fresh_write() {
        for format in [ContainerFormat::Zip, ContainerFormat::SevenZip] {
            let dir = tempdir().unwrap();
            let dest = dir.path().join(format!("set.{}", format.extension()));
            let fresh = dir.path().join(format!("fresh.{}", format.extension()));
            let opts = WriteOptions::default();

            write_container(&dest, format, sample(&[0, 2]), &opts).unwrap();
            let outcome = write_container(&dest, format, sample(&[1, 3, 0]), &opts).unwrap();
            assert_eq!(outcome, WriteOutcome::Written);

            write_container(&fresh, format, sample(&[0, 1, 2, 3]), &opts).unwrap();
            assert_eq!(std::fs::read(&dest).unwrap(), std::fs::read(&fresh).unwrap());
            assert_eq!(read_entry(&dest, "file9.bin"), b"nine");
            assert_eq!(read_entry(&dest, "dir/a.bin"), b"nested");
        }
    }

    #[test]
    fn test_directories_roundtrip() {
        for format in [ContainerFormat::Zip, ContainerFormat::SevenZip] {
            let dir = tempdir().unwrap();
            let dest = dir.path().join(format!("set.{}", format.extension()));
            let entries = vec![
                NewEntry::new(HashRecord::new("empty", "set"), EntrySource::Directory),
                file("full/x.bin", b"x"),
            ];
            write_container(&dest, format, entries, &WriteOptions::default()).unwrap();

            let archive = open(&dest).unwrap();
            assert_eq!(names(&dest), vec!["empty/", "full/x.bin"]);
            assert_eq!(
                crate::archive::archive_empty_folders(archive.as_ref()),
                vec!["empty/"]
            );
        }
    }

    #[test]
    fn test_mismatched_content_aborts_and_keeps_original() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("set.zip");
        let opts = WriteOptions::default();
        write_container(&dest, ContainerFormat::Zip, sample(&[0]), &opts).unwrap();
        let before = std::fs::read(&dest).unwrap();

        let bad = NewEntry::new(
            HashRecord::new("other.bin", "set").with_hashes(hash_bytes(b"expected", HashKinds::STANDARD)),
            EntrySource::Reader(Box::new(&b"actual"[..])),
        );
        let err = write_container(&dest, ContainerFormat::Zip, vec![bad], &opts).unwrap_err();
        assert!(matches!(err, Error::ContentMismatch { .. }));
        assert_eq!(std::fs::read(&dest).unwrap(), before);

        // no temp file survives the failed write
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_failed_source_leaves_no_container() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("set.7z");
        let missing = NewEntry::new(
            HashRecord::new("a.bin", "set"),
            EntrySource::File(dir.path().join("does-not-exist")),
        );
        let err = write_container(
            &dest,
            ContainerFormat::SevenZip,
            vec![missing],
            &WriteOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert!(!dest.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_real_dates_stamp_entries() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("set.zip");
        let entry = NewEntry::new(
            HashRecord::new("a.bin", "set").with_date("2001/02/03 04:05:06"),
            EntrySource::Reader(Box::new(&b"dated"[..])),
        );
        let opts = WriteOptions { real_dates: true };
        write_container(&dest, ContainerFormat::Zip, vec![entry], &opts).unwrap();

        let archive = open(&dest).unwrap();
        assert_eq!(
            archive.entries()[0].modified,
            DosDateTime::parse("2001/02/03 04:05:06")
        );
    }

    #[test]
    fn test_real_dates_without_dates_matches_default() {
        let dir = tempdir().unwrap();
        for format in [ContainerFormat::Zip, ContainerFormat::SevenZip] {
            let plain = dir.path().join(format!("plain.{}", format.extension()));
            let dated = dir.path().join(format!("dated.{}", format.extension()));
            let opts = WriteOptions { real_dates: true };
            write_container(&plain, format, vec![file("a.bin", b"x")], &WriteOptions::default())
                .unwrap();
            write_container(&dated, format, vec![file("a.bin", b"x")], &opts).unwrap();

            assert_eq!(std::fs::read(&plain).unwrap(), std::fs::read(&dated).unwrap());
        }
    }

    #[test]
    fn test_backslash_names_use_forward_slashes() {
        let entry = file("sub\\a.bin", b"x");
        assert_eq!(entry.container_path(), "sub/a.bin");
        let marker = NewEntry::new(HashRecord::new("blank", "set"), EntrySource::Directory);
        assert_eq!(marker.container_path(), "blank/");
    }

    #[test]
    fn test_empty_set_without_destination_is_noop() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("set.zip");
        let outcome =
            write_container(&dest, ContainerFormat::Zip, Vec::new(), &WriteOptions::default())
                .unwrap();
        assert_eq!(outcome, WriteOutcome::Unchanged);
        assert!(!dest.exists());
    }
}
