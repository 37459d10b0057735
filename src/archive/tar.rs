//! plain tar, listed and read only
//!
//! tar has no canonical form here: it is never written and never reported
//! as standardized.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::archive::entry_reader::EntryReader;
use crate::archive::{file_entry, Archive, ArchiveKind};
use crate::error::{Error, IoResultExt, Result};
use crate::types::{ArchiveEntry, DosDateTime};

/// an open tar file
pub struct TarArchive {
    path: PathBuf,
    file: File,
    entries: Vec<ArchiveEntry>,
    /// offset of each entry's data
    offsets: Vec<u64>,
}

impl TarArchive {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_path(path)?;
        let mut archive = ::tar::Archive::new(file);

        let mut entries = Vec::new();
        let mut offsets = Vec::new();
        let iter = archive
            .entries()
            .map_err(|e| Error::corrupt(path, e.to_string()))?;
        for entry in iter {
            let entry = entry.map_err(|e| Error::corrupt(path, e.to_string()))?;
            let kind = entry.header().entry_type();
            let name = entry
                .path()
                .map_err(|e| Error::corrupt(path, e.to_string()))?
                .to_string_lossy()
                .replace('\\', "/");

            let (name, size) = if kind.is_dir() {
                let name = if name.ends_with('/') { name } else { format!("{}/", name) };
                (name, 0)
            } else if kind.is_file() {
                (name, entry.size())
            } else {
                debug!(path = %path.display(), entry = %name, "skipping non-file tar entry");
                continue;
            };

            let modified = entry
                .header()
                .mtime()
                .ok()
                .and_then(|secs| chrono::DateTime::from_timestamp(i64::try_from(secs).ok()?, 0))
                .and_then(|dt| DosDateTime::from_naive(dt.naive_utc()));

            entries.push(ArchiveEntry {
                path: name,
                size,
                compressed_size: size,
                crc32: None,
                modified,
            });
            offsets.push(entry.raw_file_position());
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: archive.into_inner(),
            entries,
            offsets,
        })
    }
}

impl Archive for TarArchive {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::Tar
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    fn open_entry(&mut self, index: usize) -> Result<Box<dyn Read + '_>> {
        let size = file_entry(&self.entries, index)?.size;
        self.file
            .seek(SeekFrom::Start(self.offsets[index]))
            .with_path(&self.path)?;
        let data = (&mut self.file).take(size);
        Ok(Box::new(EntryReader::new(data, Some(size), None)))
    }

    fn is_standardized(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{archive_empty_folders, open};
    use tempfile::tempdir;

    fn build(path: &Path) {
        let mut builder = ::tar::Builder::new(File::create(path).unwrap());

        let mut dir = ::tar::Header::new_gnu();
        dir.set_entry_type(::tar::EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        dir.set_mtime(946_684_800);
        dir.set_cksum();
        builder.append_data(&mut dir, "empty/", std::io::empty()).unwrap();

        for (name, data) in [("roms/a.bin", &b"alpha"[..]), ("roms/b.bin", &b"bravo!"[..])] {
            let mut header = ::tar::Header::new_gnu();
            header.set_entry_type(::tar::EntryType::Regular);
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(946_684_800);
            header.set_cksum();
            builder.append_data(&mut header, name, data).unwrap();
        }
        builder.finish().unwrap();
    }

    #[test]
    fn test_list_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("set.tar");
        build(&path);

        let mut archive = open(&path).unwrap();
        assert_eq!(archive.kind(), ArchiveKind::Tar);
        assert!(!archive.is_standardized());
        let names: Vec<_> = archive.entries().iter().map(|e| e.path.clone()).collect();
        assert_eq!(names, vec!["empty/", "roms/a.bin", "roms/b.bin"]);
        assert_eq!(
            archive.entries()[1].modified,
            DosDateTime::parse("2000-01-01 00:00:00")
        );

        let mut out = Vec::new();
        archive.open_entry(2).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"bravo!");

        // entries can be reopened in any order
        let mut out = Vec::new();
        archive.open_entry(1).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"alpha");

        assert_eq!(archive_empty_folders(archive.as_ref()), vec!["empty/"]);
    }

    #[test]
    fn test_truncated_tar_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("set.tar");
        build(&path);
        let mut archive = TarArchive::open(&path).unwrap();

        // cut the file inside the last entry's data
        let cut = archive.offsets[2] + 3;
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(cut).unwrap();

        let err = archive
            .open_entry(2)
            .unwrap()
            .read_to_end(&mut Vec::new())
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
