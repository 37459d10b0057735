use std::io::{self, Read};
use std::path::Path;

use crate::error::Error;
use crate::hash::Crc32;

/// entry stream that checks the declared size and crc when it hits eof
///
/// a stream that ends early reports `UnexpectedEof`, a stream that runs
/// long or hashes wrong reports `InvalidData`. checks are skipped for
/// whatever the container did not declare.
pub struct EntryReader<R> {
    inner: R,
    expected_size: Option<u64>,
    expected_crc: Option<Crc32>,
    crc: crc32fast::Hasher,
    read: u64,
    checked: bool,
}

impl<R: Read> EntryReader<R> {
    pub fn new(inner: R, expected_size: Option<u64>, expected_crc: Option<Crc32>) -> Self {
        Self {
            inner,
            expected_size,
            expected_crc,
            crc: crc32fast::Hasher::new(),
            read: 0,
            checked: false,
        }
    }

    fn check_eof(&mut self) -> io::Result<()> {
        if self.checked {
            return Ok(());
        }
        self.checked = true;
        if let Some(expected) = self.expected_size {
            if self.read < expected {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended after {} of {} bytes", self.read, expected),
                ));
            }
        }
        if let Some(expected) = self.expected_crc {
            let actual = Crc32::from_u32(self.crc.clone().finalize());
            if actual != expected {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("crc mismatch: expected {}, got {}", expected, actual),
                ));
            }
        }
        Ok(())
    }
}

impl<R: Read> Read for EntryReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = self.inner.read(buf)?;
        if n == 0 {
            self.check_eof()?;
            return Ok(0);
        }
        self.read += n as u64;
        if let Some(expected) = self.expected_size {
            if self.read > expected {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("stream longer than declared {} bytes", expected),
                ));
            }
        }
        self.crc.update(&buf[..n]);
        Ok(n)
    }
}

/// map an io error raised while streaming one entry onto the error taxonomy
pub fn entry_error(path: &Path, entry: &str, err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::UnexpectedEof => Error::TruncatedEntry {
            path: path.to_path_buf(),
            entry: entry.to_string(),
        },
        // InvalidInput is how flate2 reports a corrupt deflate stream
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => Error::ContentMismatch {
            path: path.to_path_buf(),
            entry: entry.to_string(),
            reason: err.to_string(),
        },
        io::ErrorKind::Unsupported => Error::Unsupported {
            path: path.to_path_buf(),
            feature: err.to_string(),
        },
        _ => Error::Io {
            path: path.to_path_buf(),
            source: err,
        },
    }
}
