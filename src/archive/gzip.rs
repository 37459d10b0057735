//! TorrentGZ: a single-entry gzip with a fixed header carrying md5, crc and size
//!
//! layout:
//!   0x00  1f 8b 08 04              magic, deflate, FEXTRA
//!   0x04  4 bytes mtime            ignored on read
//!   0x08  00                       extra flags
//!   0x09  1 byte os                ignored on read
//!   0x0a  1c 00                    extra length (28)
//!   0x0c  16 bytes md5
//!   0x1c  4 bytes crc32, big-endian
//!   0x20  8 bytes size, little-endian
//!   0x28  raw deflate stream
//!   trailer: crc32 little-endian, size mod 2^32 little-endian
//!
//! the entry name is the sha1 in the file name, never stored inside.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use tracing::debug;

use crate::archive::entry_reader::EntryReader;
use crate::archive::{file_entry, Archive, ArchiveKind, WriteOutcome};
use crate::depot::depot_path;
use crate::error::{Error, IoResultExt, Result};
use crate::fs::TempTarget;
use crate::hash::{Crc32, Hashes, HashKinds, HashingReader, Md5, Sha1};
use crate::types::ArchiveEntry;

pub const MAGIC: [u8; 2] = [0x1f, 0x8b];

/// the fixed 12-byte preamble written by this engine
pub const HEADER_TEMPLATE: [u8; 12] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1c, 0x00,
];

/// preamble plus the 28-byte extra field
pub const HEADER_LEN: u64 = 40;

const TRAILER_LEN: u64 = 8;

/// smallest valid plain gzip: 10-byte header, empty deflate block, trailer
const MIN_GZIP_LEN: u64 = 18;

/// digests stored in a TorrentGZ header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TorrentGzHeader {
    pub md5: Md5,
    pub crc32: Crc32,
    pub size: u64,
}

impl TorrentGzHeader {
    fn encode(&self) -> [u8; HEADER_LEN as usize] {
        let mut out = [0u8; HEADER_LEN as usize];
        out[..12].copy_from_slice(&HEADER_TEMPLATE);
        out[12..28].copy_from_slice(self.md5.as_bytes());
        out[28..32].copy_from_slice(self.crc32.as_bytes());
        out[32..40].copy_from_slice(&self.size.to_le_bytes());
        out
    }

    /// parse a header whose preamble matches the template
    fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN as usize || !preamble_matches(&buf[..12]) {
            return None;
        }
        let mut size = [0u8; 8];
        size.copy_from_slice(&buf[32..40]);
        Some(Self {
            md5: Md5::from_slice(&buf[12..28])?,
            crc32: Crc32::from_slice(&buf[28..32])?,
            size: u64::from_le_bytes(size),
        })
    }
}

/// compare against the template, skipping the mtime bytes and the os byte
fn preamble_matches(buf: &[u8]) -> bool {
    buf.len() == 12
        && buf
            .iter()
            .zip(HEADER_TEMPLATE.iter())
            .enumerate()
            .all(|(i, (a, b))| matches!(i, 4..=7 | 9) || a == b)
}

/// file name is `<40 lowercase hex>.gz`
pub fn is_standardized_name(path: &Path) -> bool {
    sha1_from_name(path).is_some()
}

/// the sha1 encoded in a standardized file name
pub fn sha1_from_name(path: &Path) -> Option<Sha1> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".gz")?;
    if stem.len() != 40
        || !stem
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return None;
    }
    Sha1::from_hex(stem).ok()
}

/// static trust check: name, length and header template
pub fn is_standardized(path: &Path) -> Result<bool> {
    if !is_standardized_name(path) {
        return Ok(false);
    }
    let mut file = File::open(path).with_path(path)?;
    let len = file.metadata().with_path(path)?.len();
    if len < HEADER_LEN {
        return Ok(false);
    }
    let mut buf = [0u8; HEADER_LEN as usize];
    file.read_exact(&mut buf).with_path(path)?;
    Ok(TorrentGzHeader::decode(&buf).is_some())
}

fn read_trailer(file: &mut File, path: &Path) -> Result<(Crc32, u32)> {
    file.seek(SeekFrom::End(-(TRAILER_LEN as i64)))
        .with_path(path)?;
    let mut trailer = [0u8; TRAILER_LEN as usize];
    file.read_exact(&mut trailer).with_path(path)?;
    let crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let isize = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);
    Ok((Crc32::from_u32(crc), isize))
}

/// crc and size without decompressing
///
/// reads the gzip trailer; when a TorrentGZ header is present its 64-bit
/// size replaces the 32-bit trailer size.
pub fn quick_scan(path: &Path) -> Result<(Crc32, u64)> {
    let mut file = File::open(path).with_path(path)?;
    let len = file.metadata().with_path(path)?.len();
    if len < MIN_GZIP_LEN {
        return Err(Error::corrupt(path, "file too short for gzip"));
    }
    let mut head = Vec::with_capacity(HEADER_LEN as usize);
    (&mut file)
        .take(HEADER_LEN)
        .read_to_end(&mut head)
        .with_path(path)?;
    if !head.starts_with(&MAGIC) {
        return Err(Error::corrupt(path, "bad gzip magic"));
    }
    let (crc, isize) = read_trailer(&mut file, path)?;
    let size = TorrentGzHeader::decode(&head)
        .filter(|h| h.crc32 == crc)
        .map_or(u64::from(isize), |h| h.size);
    Ok((crc, size))
}

/// an open TorrentGZ (or plain gzip) file
pub struct GzArchive {
    path: PathBuf,
    file: File,
    len: u64,
    header: Option<TorrentGzHeader>,
    standardized: bool,
    entries: Vec<ArchiveEntry>,
}

impl GzArchive {
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path).with_path(path)?;
        let len = file.metadata().with_path(path)?.len();
        if len < MIN_GZIP_LEN {
            return Err(Error::corrupt(path, "file too short for gzip"));
        }

        let mut head = Vec::with_capacity(HEADER_LEN as usize);
        (&mut file)
            .take(HEADER_LEN)
            .read_to_end(&mut head)
            .with_path(path)?;
        if !head.starts_with(&MAGIC) || head[2] != 0x08 {
            return Err(Error::corrupt(path, "bad gzip magic"));
        }

        let (trailer_crc, isize) = read_trailer(&mut file, path)?;

        // a header that disagrees with the trailer is not trusted
        let header = TorrentGzHeader::decode(&head)
            .filter(|h| h.crc32 == trailer_crc && h.size as u32 == isize && len >= HEADER_LEN + TRAILER_LEN);
        if header.is_none() {
            debug!(path = %path.display(), "gzip without a usable torrentgz header");
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.strip_suffix(".gz").unwrap_or(n).to_string())
            .unwrap_or_default();

        let entry = match &header {
            Some(h) => ArchiveEntry {
                path: name,
                size: h.size,
                compressed_size: len - HEADER_LEN - TRAILER_LEN,
                crc32: Some(h.crc32),
                modified: None,
            },
            None => ArchiveEntry {
                path: name,
                size: u64::from(isize),
                compressed_size: len,
                crc32: Some(trailer_crc),
                modified: None,
            },
        };

        Ok(Self {
            standardized: header.is_some() && is_standardized_name(path),
            path: path.to_path_buf(),
            file,
            len,
            header,
            entries: vec![entry],
        })
    }

    /// header digests, when the file carries a trusted TorrentGZ header
    pub fn header(&self) -> Option<&TorrentGzHeader> {
        self.header.as_ref()
    }
}

impl Archive for GzArchive {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::TorrentGz
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    fn open_entry(&mut self, index: usize) -> Result<Box<dyn Read + '_>> {
        file_entry(&self.entries, index)?;
        match self.header {
            Some(h) => {
                self.file
                    .seek(SeekFrom::Start(HEADER_LEN))
                    .with_path(&self.path)?;
                let payload = (&mut self.file).take(self.len - HEADER_LEN - TRAILER_LEN);
                let decoder = flate2::bufread::DeflateDecoder::new(BufReader::new(payload));
                Ok(Box::new(EntryReader::new(
                    decoder,
                    Some(h.size),
                    Some(h.crc32),
                )))
            }
            None => {
                // plain gzip: the decoder validates its own trailer, and the
                // 32-bit size cannot be trusted for large payloads
                self.file.seek(SeekFrom::Start(0)).with_path(&self.path)?;
                let decoder = flate2::read::GzDecoder::new(&mut self.file);
                Ok(Box::new(EntryReader::new(decoder, None, None)))
            }
        }
    }

    fn is_standardized(&self) -> bool {
        self.standardized
    }
}

/// compress `source` as a TorrentGZ body into `out`
///
/// writes a placeholder header, the deflate stream and the trailer, then
/// seeks back and fills in the header. returns the payload digests
/// (crc32, md5, sha1 at least) and the uncompressed size.
pub fn write_stream<W, R>(out: &mut W, source: R, kinds: HashKinds) -> io::Result<(Hashes, u64)>
where
    W: Write + Seek,
    R: Read,
{
    let kinds = HashKinds::STANDARD
        .iter()
        .chain(kinds.iter())
        .collect::<HashKinds>();
    let start = out.stream_position()?;
    out.write_all(&[0u8; HEADER_LEN as usize])?;

    let mut hashing = HashingReader::new(source, kinds);
    let mut encoder = flate2::write::DeflateEncoder::new(&mut *out, Compression::best());
    io::copy(&mut hashing, &mut encoder)?;
    encoder.finish()?;
    let (hashes, size) = hashing.finalize();

    let (Some(crc32), Some(md5)) = (hashes.crc32, hashes.md5) else {
        return Err(io::Error::other("hasher did not produce crc32 and md5"));
    };
    out.write_all(&crc32.to_u32().to_le_bytes())?;
    out.write_all(&(size as u32).to_le_bytes())?;
    let end = out.stream_position()?;

    let header = TorrentGzHeader { md5, crc32, size };
    out.seek(SeekFrom::Start(start))?;
    out.write_all(&header.encode())?;
    out.seek(SeekFrom::Start(end))?;

    Ok((hashes, size))
}

/// result of storing one payload as a TorrentGZ
#[derive(Debug, Clone)]
pub struct GzWrite {
    pub sha1: Sha1,
    pub hashes: Hashes,
    pub size: u64,
    pub path: PathBuf,
    pub outcome: WriteOutcome,
}

/// store `source` under `root` at its sharded sha1 path
///
/// the body is written to a temp file in `tmp_dir` first, since the name is
/// only known once the payload has been hashed. an existing file at the
/// destination is never overwritten: same digest means same content.
pub fn write_to_depot<R: Read>(
    root: &Path,
    tmp_dir: &Path,
    depth: usize,
    source: R,
    kinds: HashKinds,
) -> Result<GzWrite> {
    let mut target = TempTarget::create_in(tmp_dir, "torrentgz")?;
    let tmp_path = target.path().to_path_buf();
    let (hashes, size) = write_stream(target.file_mut(), source, kinds).with_path(&tmp_path)?;

    let sha1 = hashes
        .sha1
        .ok_or_else(|| Error::corrupt(&tmp_path, "payload sha1 missing"))?;
    let path = root.join(depot_path(&sha1, depth)?);
    let outcome = if target.commit_if_absent(&path)? {
        WriteOutcome::Written
    } else {
        WriteOutcome::Unchanged
    };

    Ok(GzWrite {
        sha1,
        hashes,
        size,
        path,
        outcome,
    })
}
