//! container readers and canonical writers
//!
//! every container kind exposes the same capability set through [`Archive`]:
//! list entries, open one entry as a stream, report whether the file is
//! already canonical. format details stay inside the submodules.

pub mod canonical;
pub mod entry_reader;
pub mod gzip;
pub mod sevenzip;
pub mod tar;
pub mod zip;

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{Error, IoResultExt, Result};
use crate::natural::empty_folders;
use crate::types::ArchiveEntry;

pub use canonical::{
    write_container, ContainerFormat, EntrySink, EntrySource, NewEntry, WriteOptions,
    WriteOutcome, WrittenEntry,
};
pub use entry_reader::EntryReader;
pub use gzip::GzArchive;
pub use sevenzip::SevenZipArchive;
pub use tar::TarArchive;
pub use zip::ZipArchive;

/// container kinds the engine understands
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArchiveKind {
    TorrentGz,
    TorrentZip,
    Torrent7z,
    Tar,
}

impl ArchiveKind {
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveKind::TorrentGz => "gz",
            ArchiveKind::TorrentZip => "zip",
            ArchiveKind::Torrent7z => "7z",
            ArchiveKind::Tar => "tar",
        }
    }

    /// sniff the container kind from its leading bytes
    pub fn detect(path: &Path) -> Result<Self> {
        let mut file = File::open(path).with_path(path)?;
        let mut head = Vec::with_capacity(512);
        (&mut file)
            .take(512)
            .read_to_end(&mut head)
            .with_path(path)?;

        if head.starts_with(&gzip::MAGIC) {
            Ok(ArchiveKind::TorrentGz)
        } else if head.starts_with(&zip::LOCAL_HEADER_SIG.to_le_bytes())
            || head.starts_with(&zip::EOCD_SIG.to_le_bytes())
        {
            Ok(ArchiveKind::TorrentZip)
        } else if head.starts_with(&sevenzip::SIGNATURE) {
            Ok(ArchiveKind::Torrent7z)
        } else if head.len() >= 262 && &head[257..262] == b"ustar" {
            Ok(ArchiveKind::Tar)
        } else {
            Err(Error::corrupt(path, "unrecognized container format"))
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArchiveKind::TorrentGz => "torrentgz",
            ArchiveKind::TorrentZip => "torrentzip",
            ArchiveKind::Torrent7z => "torrent7z",
            ArchiveKind::Tar => "tar",
        };
        f.write_str(name)
    }
}

/// an open container
///
/// a handle owns its file for its whole lifetime; dropping it (or calling
/// `close`) releases the file. entry streams borrow the handle, so every
/// stream is gone before the handle can be closed.
pub trait Archive {
    fn kind(&self) -> ArchiveKind;

    /// path of the container file
    fn path(&self) -> &Path;

    /// entries in file order, directory markers included
    fn entries(&self) -> &[ArchiveEntry];

    /// open a file entry for reading; directory markers are refused
    fn open_entry(&mut self, index: usize) -> Result<Box<dyn Read + '_>>;

    /// the container already satisfies its canonical layout as found
    fn is_standardized(&self) -> bool;

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// open any supported container
pub fn open(path: &Path) -> Result<Box<dyn Archive>> {
    Ok(match ArchiveKind::detect(path)? {
        ArchiveKind::TorrentGz => Box::new(GzArchive::open(path)?),
        ArchiveKind::TorrentZip => Box::new(ZipArchive::open(path)?),
        ArchiveKind::Torrent7z => Box::new(SevenZipArchive::open(path)?),
        ArchiveKind::Tar => Box::new(TarArchive::open(path)?),
    })
}

/// directory markers in the container with nothing beneath them
pub fn archive_empty_folders(archive: &dyn Archive) -> Vec<String> {
    let paths: Vec<&str> = archive.entries().iter().map(|e| e.path.as_str()).collect();
    empty_folders(&paths)
}

/// bounds and directory check shared by every `open_entry`
pub(crate) fn file_entry(entries: &[ArchiveEntry], index: usize) -> Result<&ArchiveEntry> {
    let entry = entries.get(index).ok_or(Error::EntryOutOfRange {
        index,
        len: entries.len(),
    })?;
    if entry.is_directory() {
        return Err(Error::NotAFile(entry.path.clone()));
    }
    Ok(entry)
}
