//! canonical ordering for archive entry names
//!
//! paths are compared segment by segment (`/` and `\` both separate).
//! within a segment, runs of ascii digits compare as numbers and everything
//! else compares case-insensitively, so `file9` sorts before `file10` and the
//! order never depends on locale. segments that are equal under those rules
//! fall back to plain byte order, which keeps the order total and keeps every
//! exact segment spelling contiguous.

use std::cmp::Ordering;

#[derive(Debug, PartialEq, Eq)]
enum Chunk<'a> {
    Digits(&'a str),
    Text(&'a str),
}

fn chunks(segment: &str) -> Vec<Chunk<'_>> {
    let mut out = Vec::new();
    let bytes = segment.as_bytes();
    let mut start = 0;
    while start < bytes.len() {
        let digit = bytes[start].is_ascii_digit();
        let mut end = start + 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() == digit {
            end += 1;
        }
        // digit runs are ascii, so both boundaries are char boundaries
        let piece = &segment[start..end];
        out.push(if digit {
            Chunk::Digits(piece)
        } else {
            Chunk::Text(piece)
        });
        start = end;
    }
    out
}

fn cmp_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn cmp_text(a: &str, b: &str) -> Ordering {
    let a = a.chars().flat_map(char::to_lowercase);
    let b = b.chars().flat_map(char::to_lowercase);
    a.cmp(b)
}

fn cmp_chunk(a: &Chunk<'_>, b: &Chunk<'_>) -> Ordering {
    match (a, b) {
        (Chunk::Digits(a), Chunk::Digits(b)) => cmp_digits(a, b),
        (Chunk::Text(a), Chunk::Text(b)) => cmp_text(a, b),
        // mixed kinds differ at the first char, so "." < "0" < "a" holds
        (Chunk::Digits(a), Chunk::Text(b)) | (Chunk::Text(a), Chunk::Digits(b)) => cmp_text(a, b),
    }
}

fn cmp_segment(a: &str, b: &str) -> Ordering {
    let ca = chunks(a);
    let cb = chunks(b);
    for (x, y) in ca.iter().zip(cb.iter()) {
        let ord = cmp_chunk(x, y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    ca.len()
        .cmp(&cb.len())
        .then_with(|| a.as_bytes().cmp(b.as_bytes()))
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(['/', '\\'])
}

/// canonical comparison of two entry paths
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut sa = segments(a);
    let mut sb = segments(b);
    loop {
        match (sa.next(), sb.next()) {
            (None, None) => return a.as_bytes().cmp(b.as_bytes()),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = cmp_segment(x, y);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// sort names into canonical order
pub fn sort_natural<S: AsRef<str>>(names: &mut [S]) {
    names.sort_by(|a, b| natural_cmp(a.as_ref(), b.as_ref()));
}

/// names are strictly increasing in canonical order (no duplicates)
pub fn is_canonical_order<S: AsRef<str>>(names: &[S]) -> bool {
    names
        .windows(2)
        .all(|w| natural_cmp(w[0].as_ref(), w[1].as_ref()) == Ordering::Less)
}

/// directory markers end with a separator
pub fn is_directory_marker(path: &str) -> bool {
    path.ends_with('/') || path.ends_with('\\')
}

/// find directory markers with nothing beneath them
///
/// walks all raw entries in reverse canonical order; a directory marker is
/// kept only when it is not a prefix of the entry visited just before it,
/// which in that order is the most specific path that could live under it.
/// the result is returned in canonical order.
pub fn empty_folders<S: AsRef<str>>(paths: &[S]) -> Vec<String> {
    let mut sorted: Vec<&str> = paths.iter().map(AsRef::as_ref).collect();
    sorted.sort_by(|a, b| natural_cmp(b, a));

    let mut empty = Vec::new();
    let mut last: Option<&str> = None;
    for path in sorted {
        if is_directory_marker(path) && !last.is_some_and(|l| l.starts_with(path)) {
            empty.push(path.to_string());
        }
        last = Some(path);
    }
    empty.reverse();
    empty
}
