//! TorrentZip: a zip whose every header byte is determined by its contents
//!
//! local and central headers use version 20, flags 0x0002 (max deflate),
//! method 8, no extra fields and no comments. the archive comment is
//! `TORRENTZIPPED-XXXXXXXX`, the crc32 of the central directory in
//! uppercase hex. zip64 is never produced and rejected on read.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use tracing::debug;

use crate::archive::canonical::{EntrySink, WrittenEntry};
use crate::archive::entry_reader::EntryReader;
use crate::archive::{file_entry, Archive, ArchiveKind};
use crate::error::{Error, IoResultExt, Result};
use crate::hash::{Crc32, HashKind, HashKinds, HashingReader};
use crate::natural::is_canonical_order;
use crate::types::{ArchiveEntry, DosDateTime};

pub const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
pub const CENTRAL_SIG: u32 = 0x0201_4b50;
pub const EOCD_SIG: u32 = 0x0605_4b50;
const ZIP64_LOCATOR_SIG: u32 = 0x0706_4b50;

const LOCAL_HEADER_LEN: u64 = 30;
const CENTRAL_HEADER_LEN: usize = 46;
const EOCD_LEN: usize = 22;
const MAX_COMMENT_LEN: usize = 0xffff;

const VERSION_NEEDED: u16 = 20;
const FLAG_MAX_DEFLATE: u16 = 0x0002;
const FLAG_UTF8: u16 = 0x0800;
const FLAG_ENCRYPTED: u16 = 0x0001;
const METHOD_STORED: u16 = 0;
const METHOD_DEFLATE: u16 = 8;

const COMMENT_PREFIX: &str = "TORRENTZIPPED-";

fn u16_at(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn u32_at(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// central directory fields the reader needs beyond the entry listing
#[derive(Clone, Debug)]
struct CentralEntry {
    version_made_by: u16,
    version_needed: u16,
    flags: u16,
    method: u16,
    name_len: usize,
    extra_len: usize,
    comment_len: usize,
    disk_start: u16,
    internal_attrs: u16,
    external_attrs: u32,
    local_offset: u64,
    compressed_size: u64,
}

impl CentralEntry {
    /// header fields a TorrentZip writer would have produced for this name
    fn is_torrentzip(&self, name: &str) -> bool {
        let expected_flags = if name.is_ascii() {
            FLAG_MAX_DEFLATE
        } else {
            FLAG_MAX_DEFLATE | FLAG_UTF8
        };
        self.version_made_by == 0
            && self.version_needed == VERSION_NEEDED
            && self.flags == expected_flags
            && self.method == METHOD_DEFLATE
            && self.extra_len == 0
            && self.comment_len == 0
            && self.disk_start == 0
            && self.internal_attrs == 0
            && self.external_attrs == 0
    }
}

/// an open zip file
pub struct ZipArchive {
    path: PathBuf,
    file: File,
    entries: Vec<ArchiveEntry>,
    central: Vec<CentralEntry>,
    standardized: bool,
}

impl ZipArchive {
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path).with_path(path)?;
        let len = file.metadata().with_path(path)?.len();
        if len < EOCD_LEN as u64 {
            return Err(Error::corrupt(path, "file too short for zip"));
        }

        let tail_len = len.min((EOCD_LEN + MAX_COMMENT_LEN) as u64);
        file.seek(SeekFrom::Start(len - tail_len)).with_path(path)?;
        let mut tail = vec![0u8; tail_len as usize];
        file.read_exact(&mut tail).with_path(path)?;

        let eocd_at = (0..=tail.len() - EOCD_LEN)
            .rev()
            .find(|&i| u32_at(&tail, i) == EOCD_SIG)
            .ok_or_else(|| Error::corrupt(path, "end of central directory not found"))?;
        let eocd = &tail[eocd_at..];

        let disk = u16_at(eocd, 4);
        let cd_disk = u16_at(eocd, 6);
        let disk_entries = u16_at(eocd, 8);
        let total_entries = u16_at(eocd, 10);
        let cd_size = u32_at(eocd, 12);
        let cd_offset = u32_at(eocd, 16);
        let comment_len = u16_at(eocd, 20) as usize;

        let zip64_locator = eocd_at >= 20 && u32_at(&tail, eocd_at - 20) == ZIP64_LOCATOR_SIG;
        if zip64_locator || total_entries == 0xffff || cd_size == u32::MAX || cd_offset == u32::MAX {
            return Err(Error::unsupported(path, "zip64"));
        }
        if disk != 0 || cd_disk != 0 || disk_entries != total_entries {
            return Err(Error::unsupported(path, "multi-disk zip"));
        }
        if eocd.len() < EOCD_LEN + comment_len {
            return Err(Error::corrupt(path, "archive comment runs past end of file"));
        }
        let comment = &eocd[EOCD_LEN..EOCD_LEN + comment_len];

        let eocd_offset = len - tail_len + eocd_at as u64;
        if u64::from(cd_offset) + u64::from(cd_size) > eocd_offset {
            return Err(Error::corrupt(path, "central directory overlaps its end record"));
        }

        file.seek(SeekFrom::Start(u64::from(cd_offset)))
            .with_path(path)?;
        let mut cd = vec![0u8; cd_size as usize];
        file.read_exact(&mut cd).with_path(path)?;

        let mut entries = Vec::with_capacity(total_entries as usize);
        let mut central = Vec::with_capacity(total_entries as usize);
        let mut at = 0usize;
        for _ in 0..total_entries {
            if at + CENTRAL_HEADER_LEN > cd.len() || u32_at(&cd, at) != CENTRAL_SIG {
                return Err(Error::corrupt(path, "bad central directory header"));
            }
            let h = &cd[at..];
            let name_len = u16_at(h, 28) as usize;
            let extra_len = u16_at(h, 30) as usize;
            let entry_comment_len = u16_at(h, 32) as usize;
            let record_len = CENTRAL_HEADER_LEN + name_len + extra_len + entry_comment_len;
            if at + record_len > cd.len() {
                return Err(Error::corrupt(path, "central directory entry runs past its table"));
            }

            let compressed_size = u32_at(h, 20);
            let size = u32_at(h, 24);
            let local_offset = u32_at(h, 42);
            if compressed_size == u32::MAX || size == u32::MAX || local_offset == u32::MAX {
                return Err(Error::unsupported(path, "zip64"));
            }

            let raw_name = &h[CENTRAL_HEADER_LEN..CENTRAL_HEADER_LEN + name_len];
            let name = String::from_utf8_lossy(raw_name).replace('\\', "/");
            let flags = u16_at(h, 8);

            entries.push(ArchiveEntry {
                path: name,
                size: u64::from(size),
                compressed_size: u64::from(compressed_size),
                crc32: Some(Crc32::from_u32(u32_at(h, 16))),
                modified: Some(DosDateTime {
                    time: u16_at(h, 12),
                    date: u16_at(h, 14),
                }),
            });
            central.push(CentralEntry {
                version_made_by: u16_at(h, 4),
                version_needed: u16_at(h, 6),
                flags,
                method: u16_at(h, 10),
                name_len,
                extra_len,
                comment_len: entry_comment_len,
                disk_start: u16_at(h, 34),
                internal_attrs: u16_at(h, 36),
                external_attrs: u32_at(h, 38),
                local_offset: u64::from(local_offset),
                compressed_size: u64::from(compressed_size),
            });
            at += record_len;
        }

        let standardized = Self::check_standardized(
            &entries,
            &central,
            &cd,
            comment,
            u64::from(cd_offset),
            eocd_offset + (EOCD_LEN + comment_len) as u64 == len,
        );
        if !standardized {
            debug!(path = %path.display(), "zip is not in torrentzip form");
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            entries,
            central,
            standardized,
        })
    }

    /// static trust check over the parsed tables
    fn check_standardized(
        entries: &[ArchiveEntry],
        central: &[CentralEntry],
        cd: &[u8],
        comment: &[u8],
        cd_offset: u64,
        ends_at_eocd: bool,
    ) -> bool {
        let expected_comment = format!("{}{:08X}", COMMENT_PREFIX, crc32fast::hash(cd));
        if !ends_at_eocd || comment != expected_comment.as_bytes() {
            return false;
        }
        let names: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        if !is_canonical_order(&names) {
            return false;
        }

        // entries must be packed back to back from offset zero
        let mut next = 0u64;
        for (entry, c) in entries.iter().zip(central) {
            if !c.is_torrentzip(&entry.path) || c.local_offset != next {
                return false;
            }
            next += LOCAL_HEADER_LEN + c.name_len as u64 + c.compressed_size;
        }
        next == cd_offset
    }

    /// read the local header and position the file at the entry data
    fn seek_to_data(&mut self, index: usize) -> Result<()> {
        let offset = self.central[index].local_offset;
        self.file.seek(SeekFrom::Start(offset)).with_path(&self.path)?;
        let mut header = [0u8; LOCAL_HEADER_LEN as usize];
        self.file.read_exact(&mut header).with_path(&self.path)?;
        if u32_at(&header, 0) != LOCAL_HEADER_SIG {
            return Err(Error::corrupt(
                &self.path,
                format!("bad local header for {}", self.entries[index].path),
            ));
        }
        let skip = u64::from(u16_at(&header, 26)) + u64::from(u16_at(&header, 28));
        self.file
            .seek(SeekFrom::Current(skip as i64))
            .with_path(&self.path)?;
        Ok(())
    }
}

impl Archive for ZipArchive {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::TorrentZip
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    fn open_entry(&mut self, index: usize) -> Result<Box<dyn Read + '_>> {
        let entry = file_entry(&self.entries, index)?.clone();
        let c = &self.central[index];
        if c.flags & FLAG_ENCRYPTED != 0 {
            return Err(Error::unsupported(&self.path, "encrypted entry"));
        }
        let method = c.method;
        let compressed_size = c.compressed_size;
        if method != METHOD_STORED && method != METHOD_DEFLATE {
            return Err(Error::unsupported(
                &self.path,
                format!("compression method {}", method),
            ));
        }

        self.seek_to_data(index)?;
        let data = (&mut self.file).take(compressed_size);
        let reader: Box<dyn Read + '_> = match method {
            METHOD_STORED => Box::new(EntryReader::new(data, Some(entry.size), entry.crc32)),
            _ => {
                let decoder = flate2::bufread::DeflateDecoder::new(BufReader::new(data));
                Box::new(EntryReader::new(decoder, Some(entry.size), entry.crc32))
            }
        };
        Ok(reader)
    }

    fn is_standardized(&self) -> bool {
        self.standardized
    }
}

/// one entry as recorded for the central directory
struct WrittenHeader {
    name: Vec<u8>,
    flags: u16,
    stamp: DosDateTime,
    crc: u32,
    compressed_size: u32,
    size: u32,
    offset: u32,
}

/// TorrentZip writer over any seekable output
///
/// each local header is written with zero crc and sizes, then patched in
/// place once the entry has been compressed.
pub struct ZipWriter<W> {
    out: W,
    written: Vec<WrittenHeader>,
}

fn too_large(what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{} exceeds 4 GiB, zip64 is not written", what),
    )
}

impl<W: Write + Seek> ZipWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            written: Vec::new(),
        }
    }

    fn write_entry(
        &mut self,
        name: &str,
        modified: Option<DosDateTime>,
        kinds: HashKinds,
        source: &mut dyn Read,
    ) -> io::Result<WrittenEntry> {
        let offset = self.out.stream_position()?;
        let offset = u32::try_from(offset).map_err(|_| too_large("archive"))?;
        let stamp = modified.unwrap_or(DosDateTime::DEFAULT);
        let flags = if name.is_ascii() {
            FLAG_MAX_DEFLATE
        } else {
            FLAG_MAX_DEFLATE | FLAG_UTF8
        };
        let name = name.as_bytes().to_vec();
        let name_len = u16::try_from(name.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "entry name too long"))?;

        let mut header = Vec::with_capacity(LOCAL_HEADER_LEN as usize + name.len());
        header.extend_from_slice(&LOCAL_HEADER_SIG.to_le_bytes());
        header.extend_from_slice(&VERSION_NEEDED.to_le_bytes());
        header.extend_from_slice(&flags.to_le_bytes());
        header.extend_from_slice(&METHOD_DEFLATE.to_le_bytes());
        header.extend_from_slice(&stamp.time.to_le_bytes());
        header.extend_from_slice(&stamp.date.to_le_bytes());
        header.extend_from_slice(&[0u8; 12]);
        header.extend_from_slice(&name_len.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes());
        header.extend_from_slice(&name);
        self.out.write_all(&header)?;

        let data_start = self.out.stream_position()?;
        let mut hashing = HashingReader::new(source, kinds.with(HashKind::Crc32));
        let mut encoder = flate2::write::DeflateEncoder::new(&mut self.out, Compression::best());
        io::copy(&mut hashing, &mut encoder)?;
        encoder.finish()?;
        let data_end = self.out.stream_position()?;
        let (hashes, size) = hashing.finalize();

        let crc = hashes.crc32.map(|c| c.to_u32()).unwrap_or_default();
        let compressed_size =
            u32::try_from(data_end - data_start).map_err(|_| too_large("compressed entry"))?;
        let size32 = u32::try_from(size).map_err(|_| too_large("entry"))?;

        self.out
            .seek(SeekFrom::Start(u64::from(offset) + 14))?;
        self.out.write_all(&crc.to_le_bytes())?;
        self.out.write_all(&compressed_size.to_le_bytes())?;
        self.out.write_all(&size32.to_le_bytes())?;
        self.out.seek(SeekFrom::Start(data_end))?;

        self.written.push(WrittenHeader {
            name,
            flags,
            stamp,
            crc,
            compressed_size,
            size: size32,
            offset,
        });
        Ok(WrittenEntry { hashes, size })
    }

    fn central_directory(&self) -> Vec<u8> {
        let mut cd = Vec::new();
        for h in &self.written {
            cd.extend_from_slice(&CENTRAL_SIG.to_le_bytes());
            cd.extend_from_slice(&0u16.to_le_bytes()); // version made by
            cd.extend_from_slice(&VERSION_NEEDED.to_le_bytes());
            cd.extend_from_slice(&h.flags.to_le_bytes());
            cd.extend_from_slice(&METHOD_DEFLATE.to_le_bytes());
            cd.extend_from_slice(&h.stamp.time.to_le_bytes());
            cd.extend_from_slice(&h.stamp.date.to_le_bytes());
            cd.extend_from_slice(&h.crc.to_le_bytes());
            cd.extend_from_slice(&h.compressed_size.to_le_bytes());
            cd.extend_from_slice(&h.size.to_le_bytes());
            cd.extend_from_slice(&(h.name.len() as u16).to_le_bytes());
            // extra len, comment len, disk start, internal attrs
            cd.extend_from_slice(&[0u8; 8]);
            cd.extend_from_slice(&0u32.to_le_bytes()); // external attrs
            cd.extend_from_slice(&h.offset.to_le_bytes());
            cd.extend_from_slice(&h.name);
        }
        cd
    }
}

impl<W: Write + Seek> EntrySink for ZipWriter<W> {
    fn add_file(
        &mut self,
        name: &str,
        modified: Option<DosDateTime>,
        kinds: HashKinds,
        source: &mut dyn Read,
    ) -> io::Result<WrittenEntry> {
        self.write_entry(name, modified, kinds, source)
    }

    fn add_directory(&mut self, name: &str, modified: Option<DosDateTime>) -> io::Result<()> {
        self.write_entry(name, modified, HashKinds::CRC_ONLY, &mut io::empty())?;
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        let count = u16::try_from(self.written.len()).map_err(|_| too_large("entry count"))?;
        let cd_offset = self.out.stream_position()?;
        let cd_offset = u32::try_from(cd_offset).map_err(|_| too_large("archive"))?;
        let cd = self.central_directory();
        let comment = format!("{}{:08X}", COMMENT_PREFIX, crc32fast::hash(&cd));

        self.out.write_all(&cd)?;
        let mut eocd = Vec::with_capacity(EOCD_LEN + comment.len());
        eocd.extend_from_slice(&EOCD_SIG.to_le_bytes());
        eocd.extend_from_slice(&[0u8; 4]); // disk numbers
        eocd.extend_from_slice(&count.to_le_bytes());
        eocd.extend_from_slice(&count.to_le_bytes());
        eocd.extend_from_slice(&(cd.len() as u32).to_le_bytes());
        eocd.extend_from_slice(&cd_offset.to_le_bytes());
        eocd.extend_from_slice(&(comment.len() as u16).to_le_bytes());
        eocd.extend_from_slice(comment.as_bytes());
        self.out.write_all(&eocd)?;
        self.out.flush()
    }
}
