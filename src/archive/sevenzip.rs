//! Torrent7z: a 7z archive laid out deterministically
//!
//! every non-empty file gets its own folder with a single deflate coder, the
//! packed streams follow the signature header back to back in entry order,
//! and a plain (never encoded) header closes the file. directories and empty
//! files live only in the header. modification times are stored only when
//! real dates are requested.
//!
//! the reader handles plain headers with one coder per folder and one
//! unpack stream per folder; anything else is reported as unsupported.

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

pub const SIGNATURE: [u8; 6] = [b'7', b'z', 0xbc, 0xaf, 0x27, 0x1c];
const VERSION: [u8; 2] = [0, 4];
const SIGNATURE_HEADER_LEN: u64 = 32;

const DEFLATE_CODER: [u8; 3] = [0x04, 0x01, 0x08];
const COPY_CODER: [u8; 1] = [0x00];

// property ids
const K_END: u8 = 0x00;
const K_HEADER: u8 = 0x01;
const K_ARCHIVE_PROPERTIES: u8 = 0x02;
const K_ADDITIONAL_STREAMS_INFO: u8 = 0x03;
const K_MAIN_STREAMS_INFO: u8 = 0x04;
const K_FILES_INFO: u8 = 0x05;
const K_PACK_INFO: u8 = 0x06;
const K_UNPACK_INFO: u8 = 0x07;
const K_SUBSTREAMS_INFO: u8 = 0x08;
const K_SIZE: u8 = 0x09;
const K_CRC: u8 = 0x0a;
const K_FOLDER: u8 = 0x0b;
const K_CODERS_UNPACK_SIZE: u8 = 0x0c;
const K_NUM_UNPACK_STREAM: u8 = 0x0d;
const K_EMPTY_STREAM: u8 = 0x0e;
const K_EMPTY_FILE: u8 = 0x0f;
const K_NAME: u8 = 0x11;
const K_MTIME: u8 = 0x14;
const K_ENCODED_HEADER: u8 = 0x17;

/// append a 7z variable-length NUMBER
///
/// the count of leading one bits in the first byte is the number of extra
/// little-endian bytes; the remaining low bits of the first byte hold the
/// most significant part.
pub fn write_number(out: &mut Vec<u8>, value: u64) {
    let mut first = 0u8;
    let mut mask = 0x80u8;
    let mut extra = 0usize;
    while extra < 8 {
        if value < (1u64 << (7 * (extra + 1))) {
            first |= (value >> (8 * extra)) as u8;
            break;
        }
        first |= mask;
        mask >>= 1;
        extra += 1;
    }
    out.push(first);
    for i in 0..extra {
        out.push((value >> (8 * i)) as u8);
    }
}

/// cursor over header bytes
struct HeaderReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

/// header parse failure, turned into a corrupt-container error by the caller
#[derive(Debug)]
enum ParseError {
    Truncated,
    Bad(String),
    Unsupported(String),
}

type Parse<T> = std::result::Result<T, ParseError>;

impl<'a> HeaderReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn byte(&mut self) -> Parse<u8> {
        let b = *self.buf.get(self.pos).ok_or(ParseError::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn bytes(&mut self, n: usize) -> Parse<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(ParseError::Truncated)?;
        let out = self.buf.get(self.pos..end).ok_or(ParseError::Truncated)?;
        self.pos = end;
        Ok(out)
    }

    fn u32(&mut self) -> Parse<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Parse<u64> {
        let b = self.bytes(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    fn number(&mut self) -> Parse<u64> {
        let first = self.byte()?;
        let mut mask = 0x80u8;
        let mut value = 0u64;
        for i in 0..8 {
            if first & mask == 0 {
                let high = u64::from(first & mask.wrapping_sub(1));
                return Ok(value | (high << (8 * i)));
            }
            value |= u64::from(self.byte()?) << (8 * i);
            mask >>= 1;
        }
        Ok(value)
    }

    /// a NUMBER used as a count or length; bounded by the remaining header
    fn count(&mut self) -> Parse<usize> {
        let n = self.number()?;
        usize::try_from(n)
            .ok()
            .filter(|&n| n <= self.buf.len())
            .ok_or_else(|| ParseError::Bad(format!("count {} exceeds header size", n)))
    }

    fn expect(&mut self, id: u8) -> Parse<()> {
        let got = self.byte()?;
        if got != id {
            return Err(ParseError::Bad(format!(
                "expected property {:#04x}, found {:#04x}",
                id, got
            )));
        }
        Ok(())
    }

    fn bit_vector(&mut self, n: usize) -> Parse<Vec<bool>> {
        let bytes = self.bytes(n.div_ceil(8))?;
        Ok((0..n)
            .map(|i| bytes[i / 8] & (0x80 >> (i % 8)) != 0)
            .collect())
    }

    /// an all-defined byte followed by an optional bit vector
    fn defined_vector(&mut self, n: usize) -> Parse<Vec<bool>> {
        if self.byte()? != 0 {
            Ok(vec![true; n])
        } else {
            self.bit_vector(n)
        }
    }

    fn digests(&mut self, n: usize) -> Parse<Vec<Option<u32>>> {
        let defined = self.defined_vector(n)?;
        defined
            .into_iter()
            .map(|d| if d { self.u32().map(Some) } else { Ok(None) })
            .collect()
    }
}

fn write_bit_vector(out: &mut Vec<u8>, bits: &[bool]) {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, _) in bits.iter().enumerate().filter(|(_, b)| **b) {
        bytes[i / 8] |= 0x80 >> (i % 8);
    }
    out.extend_from_slice(&bytes);
}

/// one file as described by the header
#[derive(Clone, Debug, PartialEq, Eq)]
enum HeaderItem {
    Stream {
        size: u64,
        pack_size: u64,
        crc: u32,
        coder: Vec<u8>,
    },
    EmptyFile,
    Directory,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct HeaderFile {
    /// stored name: `/` separators, no trailing slash on directories
    name: String,
    item: HeaderItem,
    modified: Option<DosDateTime>,
}

/// header bytes for a file list, exactly as the writer lays them out
fn encode_header(files: &[HeaderFile]) -> Vec<u8> {
    let mut out = vec![K_HEADER];
    let streams: Vec<(u64, u64, u32, &[u8])> = files
        .iter()
        .filter_map(|f| match &f.item {
            HeaderItem::Stream {
                size,
                pack_size,
                crc,
                coder,
            } => Some((*size, *pack_size, *crc, coder.as_slice())),
            _ => None,
        })
        .collect();

    if !streams.is_empty() {
        out.push(K_MAIN_STREAMS_INFO);

        out.push(K_PACK_INFO);
        write_number(&mut out, 0);
        write_number(&mut out, streams.len() as u64);
        out.push(K_SIZE);
        for (_, pack_size, _, _) in &streams {
            write_number(&mut out, *pack_size);
        }
        out.push(K_END);

        out.push(K_UNPACK_INFO);
        out.push(K_FOLDER);
        write_number(&mut out, streams.len() as u64);
        out.push(0); // not external
        for (_, _, _, coder) in &streams {
            write_number(&mut out, 1);
            // simple coder, no properties, id length in the low nibble
            out.push(coder.len() as u8);
            out.extend_from_slice(coder);
        }
        out.push(K_CODERS_UNPACK_SIZE);
        for (size, _, _, _) in &streams {
            write_number(&mut out, *size);
        }
        out.push(K_CRC);
        out.push(1); // all defined
        for (_, _, crc, _) in &streams {
            out.extend_from_slice(&crc.to_le_bytes());
        }
        out.push(K_END);

        out.push(K_END);
    }

    if !files.is_empty() {
        out.push(K_FILES_INFO);
        write_number(&mut out, files.len() as u64);

        let empty_stream: Vec<bool> = files
            .iter()
            .map(|f| !matches!(f.item, HeaderItem::Stream { .. }))
            .collect();
        if empty_stream.iter().any(|b| *b) {
            out.push(K_EMPTY_STREAM);
            write_number(&mut out, empty_stream.len().div_ceil(8) as u64);
            write_bit_vector(&mut out, &empty_stream);

            let empty_file: Vec<bool> = files
                .iter()
                .filter(|f| !matches!(f.item, HeaderItem::Stream { .. }))
                .map(|f| f.item == HeaderItem::EmptyFile)
                .collect();
            if empty_file.iter().any(|b| *b) {
                out.push(K_EMPTY_FILE);
                write_number(&mut out, empty_file.len().div_ceil(8) as u64);
                write_bit_vector(&mut out, &empty_file);
            }
        }

        let mut names = vec![0u8]; // not external
        for f in files {
            for unit in f.name.encode_utf16() {
                names.extend_from_slice(&unit.to_le_bytes());
            }
            names.extend_from_slice(&[0, 0]);
        }
        out.push(K_NAME);
        write_number(&mut out, names.len() as u64);
        out.extend_from_slice(&names);

        if files.iter().any(|f| f.modified.is_some()) {
            let mut times = vec![1u8, 0u8]; // all defined, not external
            for f in files {
                let stamp = f.modified.unwrap_or(DosDateTime::DEFAULT);
                let ticks = stamp.to_filetime().unwrap_or_default();
                times.extend_from_slice(&ticks.to_le_bytes());
            }
            out.push(K_MTIME);
            write_number(&mut out, times.len() as u64);
            out.extend_from_slice(&times);
        }

        out.push(K_END);
    }

    out.push(K_END);
    out
}

/// start header: next-header offset, size and crc, prefixed by their own crc
fn signature_header(next_offset: u64, next_size: u64, next_crc: u32) -> [u8; 32] {
    let mut start = [0u8; 20];
    start[..8].copy_from_slice(&next_offset.to_le_bytes());
    start[8..16].copy_from_slice(&next_size.to_le_bytes());
    start[16..].copy_from_slice(&next_crc.to_le_bytes());

    let mut out = [0u8; 32];
    out[..6].copy_from_slice(&SIGNATURE);
    out[6..8].copy_from_slice(&VERSION);
    out[8..12].copy_from_slice(&crc32fast::hash(&start).to_le_bytes());
    out[12..].copy_from_slice(&start);
    out
}

/// streams info as read from the header
#[derive(Default)]
struct StreamsInfo {
    pack_pos: u64,
    pack_sizes: Vec<u64>,
    coders: Vec<Vec<u8>>,
    unpack_sizes: Vec<u64>,
    crcs: Vec<Option<u32>>,
}

fn parse_pack_info(r: &mut HeaderReader<'_>, info: &mut StreamsInfo) -> Parse<()> {
    info.pack_pos = r.number()?;
    let n = r.count()?;
    loop {
        match r.byte()? {
            K_END => break,
            K_SIZE => {
                info.pack_sizes = (0..n).map(|_| r.number()).collect::<Parse<_>>()?;
            }
            K_CRC => {
                r.digests(n)?;
            }
            other => return Err(ParseError::Bad(format!("unexpected pack property {:#04x}", other))),
        }
    }
    if info.pack_sizes.len() != n {
        return Err(ParseError::Bad("pack sizes missing".to_string()));
    }
    Ok(())
}

fn parse_folder(r: &mut HeaderReader<'_>) -> Parse<Vec<u8>> {
    let num_coders = r.count()?;
    if num_coders != 1 {
        return Err(ParseError::Unsupported(format!("folder with {} coders", num_coders)));
    }
    let flags = r.byte()?;
    if flags & 0x80 != 0 {
        return Err(ParseError::Unsupported("alternative coder methods".to_string()));
    }
    let id = r.bytes(usize::from(flags & 0x0f))?.to_vec();
    if flags & 0x10 != 0 {
        let ins = r.number()?;
        let outs = r.number()?;
        if ins != 1 || outs != 1 {
            return Err(ParseError::Unsupported("complex coder".to_string()));
        }
    }
    if flags & 0x20 != 0 {
        let len = r.count()?;
        r.bytes(len)?;
    }
    Ok(id)
}

fn parse_unpack_info(r: &mut HeaderReader<'_>, info: &mut StreamsInfo) -> Parse<()> {
    r.expect(K_FOLDER)?;
    let n = r.count()?;
    if r.byte()? != 0 {
        return Err(ParseError::Unsupported("external folder table".to_string()));
    }
    info.coders = (0..n).map(|_| parse_folder(r)).collect::<Parse<_>>()?;
    r.expect(K_CODERS_UNPACK_SIZE)?;
    info.unpack_sizes = (0..n).map(|_| r.number()).collect::<Parse<_>>()?;
    info.crcs = vec![None; n];
    loop {
        match r.byte()? {
            K_END => break,
            K_CRC => info.crcs = r.digests(n)?,
            other => {
                return Err(ParseError::Bad(format!(
                    "unexpected unpack property {:#04x}",
                    other
                )))
            }
        }
    }
    Ok(())
}

fn parse_substreams_info(r: &mut HeaderReader<'_>, info: &mut StreamsInfo) -> Parse<()> {
    loop {
        match r.byte()? {
            K_END => break,
            K_NUM_UNPACK_STREAM => {
                for _ in 0..info.coders.len() {
                    if r.number()? != 1 {
                        return Err(ParseError::Unsupported(
                            "folder with several unpack streams".to_string(),
                        ));
                    }
                }
            }
            K_CRC => {
                let missing: Vec<usize> = (0..info.crcs.len())
                    .filter(|&i| info.crcs[i].is_none())
                    .collect();
                let digests = r.digests(missing.len())?;
                for (i, crc) in missing.into_iter().zip(digests) {
                    info.crcs[i] = crc;
                }
            }
            other => {
                return Err(ParseError::Bad(format!(
                    "unexpected substreams property {:#04x}",
                    other
                )))
            }
        }
    }
    Ok(())
}

fn parse_streams_info(r: &mut HeaderReader<'_>) -> Parse<StreamsInfo> {
    let mut info = StreamsInfo::default();
    loop {
        match r.byte()? {
            K_END => break,
            K_PACK_INFO => parse_pack_info(r, &mut info)?,
            K_UNPACK_INFO => parse_unpack_info(r, &mut info)?,
            K_SUBSTREAMS_INFO => parse_substreams_info(r, &mut info)?,
            other => {
                return Err(ParseError::Bad(format!(
                    "unexpected streams property {:#04x}",
                    other
                )))
            }
        }
    }
    if info.pack_sizes.len() != info.coders.len() {
        return Err(ParseError::Unsupported(
            "pack streams not one per folder".to_string(),
        ));
    }
    Ok(info)
}

fn parse_names(data: &[u8], n: usize) -> Parse<Vec<String>> {
    let (&external, data) = data.split_first().ok_or(ParseError::Truncated)?;
    if external != 0 {
        return Err(ParseError::Unsupported("external name table".to_string()));
    }
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    let names: Vec<String> = units
        .split(|u| *u == 0)
        .take(n)
        .map(String::from_utf16_lossy)
        .collect();
    if names.len() != n {
        return Err(ParseError::Bad("name table too short".to_string()));
    }
    Ok(names)
}

struct FilesInfo {
    names: Vec<String>,
    empty_stream: Vec<bool>,
    empty_file: Vec<bool>,
    mtimes: Vec<Option<u64>>,
}

fn parse_files_info(r: &mut HeaderReader<'_>) -> Parse<FilesInfo> {
    let n = r.count()?;
    let mut info = FilesInfo {
        names: Vec::new(),
        empty_stream: vec![false; n],
        empty_file: Vec::new(),
        mtimes: vec![None; n],
    };
    loop {
        let id = r.number()?;
        if id == u64::from(K_END) {
            break;
        }
        let size = r.count()?;
        let data = r.bytes(size)?;
        let mut prop = HeaderReader::new(data);
        match u8::try_from(id).unwrap_or(u8::MAX) {
            K_EMPTY_STREAM => info.empty_stream = prop.bit_vector(n)?,
            K_EMPTY_FILE => {
                let empties = info.empty_stream.iter().filter(|b| **b).count();
                info.empty_file = prop.bit_vector(empties)?;
            }
            K_NAME => info.names = parse_names(data, n)?,
            K_MTIME => {
                let defined = prop.defined_vector(n)?;
                if prop.byte()? != 0 {
                    return Err(ParseError::Unsupported("external time table".to_string()));
                }
                for (i, d) in defined.into_iter().enumerate() {
                    if d {
                        info.mtimes[i] = Some(prop.u64()?);
                    }
                }
            }
            // attributes, other timestamps, padding
            _ => {}
        }
    }
    if info.names.len() != n {
        return Err(ParseError::Bad("file names missing".to_string()));
    }
    Ok(info)
}

/// parsed plain header: files plus the offsets of their packed streams
struct ParsedHeader {
    files: Vec<HeaderFile>,
    pack_pos: u64,
}

fn parse_header(buf: &[u8]) -> Parse<ParsedHeader> {
    let mut r = HeaderReader::new(buf);
    match r.byte()? {
        K_HEADER => {}
        K_ENCODED_HEADER => return Err(ParseError::Unsupported("encoded header".to_string())),
        other => return Err(ParseError::Bad(format!("unknown header type {:#04x}", other))),
    }

    let mut streams = StreamsInfo::default();
    let mut files = None;
    loop {
        match r.byte()? {
            K_END => break,
            K_ARCHIVE_PROPERTIES => {
                while r.number()? != 0 {
                    let len = r.count()?;
                    r.bytes(len)?;
                }
            }
            K_ADDITIONAL_STREAMS_INFO => {
                return Err(ParseError::Unsupported("additional streams".to_string()))
            }
            K_MAIN_STREAMS_INFO => streams = parse_streams_info(&mut r)?,
            K_FILES_INFO => files = Some(parse_files_info(&mut r)?),
            other => return Err(ParseError::Bad(format!("unknown header property {:#04x}", other))),
        }
    }

    let Some(files) = files else {
        if streams.coders.is_empty() {
            return Ok(ParsedHeader {
                files: Vec::new(),
                pack_pos: streams.pack_pos,
            });
        }
        return Err(ParseError::Bad("streams without files".to_string()));
    };

    let mut out = Vec::with_capacity(files.names.len());
    let mut stream = 0usize;
    let mut empty = 0usize;
    for (i, name) in files.names.into_iter().enumerate() {
        let modified = files.mtimes[i].and_then(DosDateTime::from_filetime);
        let item = if files.empty_stream[i] {
            let is_file = files.empty_file.get(empty).copied().unwrap_or(false);
            empty += 1;
            if is_file {
                HeaderItem::EmptyFile
            } else {
                HeaderItem::Directory
            }
        } else {
            let s = stream;
            stream += 1;
            if s >= streams.coders.len() {
                return Err(ParseError::Bad("more files than streams".to_string()));
            }
            HeaderItem::Stream {
                size: streams.unpack_sizes[s],
                pack_size: streams.pack_sizes[s],
                crc: streams.crcs[s].ok_or_else(|| {
                    ParseError::Bad(format!("no crc for stream {}", s))
                })?,
                coder: streams.coders[s].clone(),
            }
        };
        out.push(HeaderFile {
            name: name.replace('\\', "/"),
            item,
            modified,
        });
    }
    if stream != streams.coders.len() {
        return Err(ParseError::Bad("streams without files".to_string()));
    }

    Ok(ParsedHeader {
        files: out,
        pack_pos: streams.pack_pos,
    })
}

/// an open 7z file
pub struct SevenZipArchive {
    path: PathBuf,
    file: File,
    entries: Vec<ArchiveEntry>,
    /// absolute offset and coder of each entry's packed stream
    streams: Vec<Option<(u64, Vec<u8>)>>,
    standardized: bool,
}

impl SevenZipArchive {
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path).with_path(path)?;
        let len = file.metadata().with_path(path)?.len();
        if len < SIGNATURE_HEADER_LEN {
            return Err(Error::corrupt(path, "file too short for 7z"));
        }
        let mut sig = [0u8; SIGNATURE_HEADER_LEN as usize];
        file.read_exact(&mut sig).with_path(path)?;
        if sig[..6] != SIGNATURE {
            return Err(Error::corrupt(path, "bad 7z signature"));
        }
        if sig[6] != 0 {
            return Err(Error::unsupported(path, format!("7z version {}.{}", sig[6], sig[7])));
        }
        let start_crc = u32::from_le_bytes([sig[8], sig[9], sig[10], sig[11]]);
        if crc32fast::hash(&sig[12..]) != start_crc {
            return Err(Error::corrupt(path, "start header crc mismatch"));
        }
        let mut r = HeaderReader::new(&sig[12..]);
        let (next_offset, next_size, next_crc) = match (r.u64(), r.u64(), r.u32()) {
            (Ok(o), Ok(s), Ok(c)) => (o, s, c),
            _ => return Err(Error::corrupt(path, "short start header")),
        };

        let header_end = SIGNATURE_HEADER_LEN
            .checked_add(next_offset)
            .and_then(|v| v.checked_add(next_size))
            .filter(|&end| end <= len)
            .ok_or_else(|| Error::corrupt(path, "header lies past end of file"))?;

        let parsed = if next_size == 0 {
            ParsedHeader {
                files: Vec::new(),
                pack_pos: 0,
            }
        } else {
            file.seek(SeekFrom::Start(SIGNATURE_HEADER_LEN + next_offset))
                .with_path(path)?;
            let mut header = vec![0u8; next_size as usize];
            file.read_exact(&mut header).with_path(path)?;
            if crc32fast::hash(&header) != next_crc {
                return Err(Error::corrupt(path, "header crc mismatch"));
            }
            parse_header(&header).map_err(|e| match e {
                ParseError::Truncated => Error::corrupt(path, "truncated header"),
                ParseError::Bad(reason) => Error::corrupt(path, reason),
                ParseError::Unsupported(feature) => Error::unsupported(path, feature),
            })?
        };

        let mut entries = Vec::with_capacity(parsed.files.len());
        let mut streams = Vec::with_capacity(parsed.files.len());
        let mut pack_offset = SIGNATURE_HEADER_LEN
            .checked_add(parsed.pack_pos)
            .ok_or_else(|| Error::corrupt(path, "pack position out of range"))?;
        for f in &parsed.files {
            match &f.item {
                HeaderItem::Stream {
                    size,
                    pack_size,
                    crc,
                    coder,
                } => {
                    let pack_end = pack_offset
                        .checked_add(*pack_size)
                        .filter(|&end| end <= len)
                        .ok_or_else(|| {
                            Error::corrupt(path, format!("packed data for {} past end of file", f.name))
                        })?;
                    entries.push(ArchiveEntry {
                        path: f.name.clone(),
                        size: *size,
                        compressed_size: *pack_size,
                        crc32: Some(Crc32::from_u32(*crc)),
                        modified: f.modified,
                    });
                    streams.push(Some((pack_offset, coder.clone())));
                    pack_offset = pack_end;
                }
                HeaderItem::EmptyFile => {
                    entries.push(ArchiveEntry {
                        path: f.name.clone(),
                        size: 0,
                        compressed_size: 0,
                        crc32: Some(Crc32::from_u32(0)),
                        modified: f.modified,
                    });
                    streams.push(None);
                }
                HeaderItem::Directory => {
                    entries.push(ArchiveEntry {
                        path: format!("{}/", f.name),
                        size: 0,
                        compressed_size: 0,
                        crc32: None,
                        modified: f.modified,
                    });
                    streams.push(None);
                }
            }
        }

        let names: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        let standardized = parsed.pack_pos == 0
            && header_end == len
            && pack_offset == SIGNATURE_HEADER_LEN + next_offset
            && is_canonical_order(&names)
            && parsed.files.iter().all(|f| match &f.item {
                HeaderItem::Stream { coder, .. } => coder.as_slice() == DEFLATE_CODER,
                _ => true,
            })
            && regenerated_matches(&mut file, path, &parsed.files, next_offset, next_size)?;
        if !standardized {
            debug!(path = %path.display(), "7z is not in torrent7z form");
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            entries,
            streams,
            standardized,
        })
    }
}

/// the stored header is byte-for-byte what the writer would emit
fn regenerated_matches(
    file: &mut File,
    path: &Path,
    files: &[HeaderFile],
    next_offset: u64,
    next_size: u64,
) -> Result<bool> {
    let expected = if files.is_empty() {
        Vec::new()
    } else {
        encode_header(files)
    };
    if expected.len() as u64 != next_size {
        return Ok(false);
    }
    if expected.is_empty() {
        return Ok(true);
    }
    let mut stored = vec![0u8; expected.len()];
    file.seek(SeekFrom::Start(SIGNATURE_HEADER_LEN + next_offset))
        .with_path(path)?;
    file.read_exact(&mut stored).with_path(path)?;
    Ok(stored == expected)
}

impl Archive for SevenZipArchive {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::Torrent7z
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    fn open_entry(&mut self, index: usize) -> Result<Box<dyn Read + '_>> {
        let entry = file_entry(&self.entries, index)?.clone();
        let Some((offset, coder)) = self.streams[index].clone() else {
            return Ok(Box::new(io::empty()));
        };

        self.file
            .seek(SeekFrom::Start(offset))
            .with_path(&self.path)?;
        let data = (&mut self.file).take(entry.compressed_size);
        let reader: Box<dyn Read + '_> = if coder.as_slice() == DEFLATE_CODER {
            let decoder = flate2::bufread::DeflateDecoder::new(BufReader::new(data));
            Box::new(EntryReader::new(decoder, Some(entry.size), entry.crc32))
        } else if coder.as_slice() == COPY_CODER {
            Box::new(EntryReader::new(data, Some(entry.size), entry.crc32))
        } else {
            return Err(Error::unsupported(
                &self.path,
                format!("coder {}", hex::encode(&coder)),
            ));
        };
        Ok(reader)
    }

    fn is_standardized(&self) -> bool {
        self.standardized
    }
}

/// Torrent7z writer over any seekable output
///
/// reserves the signature header, streams one deflate folder per non-empty
/// file, then writes the header and fills in the signature header.
pub struct SevenZipWriter<W> {
    out: W,
    start: u64,
    files: Vec<HeaderFile>,
}

impl<W: Write + Seek> SevenZipWriter<W> {
    pub fn new(mut out: W) -> io::Result<Self> {
        let start = out.stream_position()?;
        out.write_all(&[0u8; SIGNATURE_HEADER_LEN as usize])?;
        Ok(Self {
            out,
            start,
            files: Vec::new(),
        })
    }
}

impl<W: Write + Seek> EntrySink for SevenZipWriter<W> {
    fn add_file(
        &mut self,
        name: &str,
        modified: Option<DosDateTime>,
        kinds: HashKinds,
        source: &mut dyn Read,
    ) -> io::Result<WrittenEntry> {
        let kinds = kinds.with(HashKind::Crc32);

        // an empty file has no stream, so look before opening a folder
        let mut first = vec![0u8; 64 * 1024];
        let n = loop {
            match source.read(&mut first) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        first.truncate(n);

        let mut hashing = HashingReader::new(first.as_slice().chain(source), kinds);
        let item = if n == 0 {
            io::copy(&mut hashing, &mut io::sink())?;
            HeaderItem::EmptyFile
        } else {
            let pack_start = self.out.stream_position()?;
            let mut encoder =
                flate2::write::DeflateEncoder::new(&mut self.out, Compression::best());
            io::copy(&mut hashing, &mut encoder)?;
            encoder.finish()?;
            let pack_end = self.out.stream_position()?;
            HeaderItem::Stream {
                size: 0,
                pack_size: pack_end - pack_start,
                crc: 0,
                coder: DEFLATE_CODER.to_vec(),
            }
        };
        let (hashes, size) = hashing.finalize();

        let item = match item {
            HeaderItem::Stream {
                pack_size, coder, ..
            } => HeaderItem::Stream {
                size,
                pack_size,
                crc: hashes.crc32.map(|c| c.to_u32()).unwrap_or_default(),
                coder,
            },
            other => other,
        };
        self.files.push(HeaderFile {
            name: name.replace('\\', "/"),
            item,
            modified,
        });
        Ok(WrittenEntry { hashes, size })
    }

    fn add_directory(&mut self, name: &str, modified: Option<DosDateTime>) -> io::Result<()> {
        let name = name.replace('\\', "/");
        self.files.push(HeaderFile {
            name: name.trim_end_matches('/').to_string(),
            item: HeaderItem::Directory,
            modified,
        });
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        let header_start = self.out.stream_position()?;
        let next_offset = header_start - self.start - SIGNATURE_HEADER_LEN;
        let header = if self.files.is_empty() {
            Vec::new()
        } else {
            encode_header(&self.files)
        };
        self.out.write_all(&header)?;
        let end = self.out.stream_position()?;

        let sig = signature_header(next_offset, header.len() as u64, crc32fast::hash(&header));
        self.out.seek(SeekFrom::Start(self.start))?;
        self.out.write_all(&sig)?;
        self.out.seek(SeekFrom::Start(end))?;
        self.out.flush()
    }
}
