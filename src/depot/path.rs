use std::path::PathBuf;

use crate::config::validate_depth;
use crate::error::{Error, Result};
use crate::hash::Sha1;

/// extension of single-file depot containers
pub const DEPOT_EXTENSION: &str = "gz";

/// sharded relative path for a sha1 with the default container extension
///
/// `depth` two-char directories, then the full digest: depth 2 gives
/// `ab/cd/abcd....gz`, depth 0 a flat file name.
pub fn depot_path(sha1: &Sha1, depth: usize) -> Result<PathBuf> {
    depot_path_with_extension(sha1, depth, DEPOT_EXTENSION)
}

/// sharded relative path for a sha1 with an explicit extension
pub fn depot_path_with_extension(sha1: &Sha1, depth: usize, extension: &str) -> Result<PathBuf> {
    validate_depth(depth)?;
    let hex = sha1.to_hex();
    let mut path = PathBuf::new();
    for i in 0..depth {
        path.push(&hex[i * 2..i * 2 + 2]);
    }
    if extension.is_empty() {
        path.push(&hex);
    } else {
        path.push(format!("{}.{}", hex, extension));
    }
    Ok(path)
}

/// resolve a 40-hex sha1 string
pub fn resolve(sha1_hex: &str, depth: usize) -> Result<PathBuf> {
    if sha1_hex.len() != 40 {
        return Err(Error::InvalidHashHex(sha1_hex.to_string()));
    }
    let sha1 = Sha1::from_hex(sha1_hex)?;
    depot_path(&sha1, depth)
}
