use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

use md5::Md5 as Md5Hasher;
use serde::{Deserialize, Serialize};
use sha1::Sha1 as Sha1Hasher;
use sha2::{Digest, Sha256 as Sha256Hasher, Sha384 as Sha384Hasher, Sha512 as Sha512Hasher};

use crate::Error;

/// fixed-width digest value, displayed and serialized as lowercase hex
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Checksum<const N: usize>([u8; N]);

pub type Crc32 = Checksum<4>;
pub type Md5 = Checksum<16>;
pub type Sha1 = Checksum<20>;
pub type Sha256 = Checksum<32>;
pub type Sha384 = Checksum<48>;
pub type Sha512 = Checksum<64>;

impl<const N: usize> Checksum<N> {
    /// create from raw bytes
    pub fn from_bytes(bytes: [u8; N]) -> Self {
        Self(bytes)
    }

    /// create from a slice, None if the length is wrong
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; N]>::try_from(bytes).ok().map(Self)
    }

    /// parse from hex string (case-insensitive)
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        let bytes = hex::decode(s).map_err(|_| Error::InvalidHashHex(s.to_string()))?;
        Self::from_slice(&bytes).ok_or_else(|| Error::InvalidHashHex(s.to_string()))
    }

    /// get raw bytes
    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }

    /// convert to lowercase hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Checksum<4> {
    /// crc values are stored big-endian, the order they are printed in
    pub fn from_u32(value: u32) -> Self {
        Self(value.to_be_bytes())
    }

    pub fn to_u32(&self) -> u32 {
        u32::from_be_bytes(self.0)
    }
}

impl<const N: usize> fmt::Display for Checksum<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl<const N: usize> fmt::Debug for Checksum<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "Checksum({})", &hex[..hex.len().min(12)])
    }
}

impl<const N: usize> FromStr for Checksum<N> {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl<const N: usize> Serialize for Checksum<N> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de, const N: usize> Deserialize<'de> for Checksum<N> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// supported digest algorithms, in rename priority order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashKind {
    Crc32,
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashKind {
    pub const ALL: [HashKind; 6] = [
        HashKind::Crc32,
        HashKind::Md5,
        HashKind::Sha1,
        HashKind::Sha256,
        HashKind::Sha384,
        HashKind::Sha512,
    ];

    fn bit(self) -> u8 {
        1 << (self as u8)
    }

    pub fn name(self) -> &'static str {
        match self {
            HashKind::Crc32 => "crc32",
            HashKind::Md5 => "md5",
            HashKind::Sha1 => "sha1",
            HashKind::Sha256 => "sha256",
            HashKind::Sha384 => "sha384",
            HashKind::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for HashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "crc" | "crc32" => Ok(HashKind::Crc32),
            "md5" => Ok(HashKind::Md5),
            "sha1" => Ok(HashKind::Sha1),
            "sha256" => Ok(HashKind::Sha256),
            "sha384" => Ok(HashKind::Sha384),
            "sha512" => Ok(HashKind::Sha512),
            _ => Err(Error::UnknownHashKind(s.to_string())),
        }
    }
}

/// a set of hash kinds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct HashKinds(u8);

impl HashKinds {
    pub const NONE: HashKinds = HashKinds(0);
    pub const ALL: HashKinds = HashKinds(0b11_1111);
    /// crc32 + md5 + sha1
    pub const STANDARD: HashKinds = HashKinds(0b111);
    pub const CRC_ONLY: HashKinds = HashKinds(0b1);

    pub fn contains(self, kind: HashKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn with(self, kind: HashKind) -> Self {
        Self(self.0 | kind.bit())
    }

    pub fn intersect(self, other: HashKinds) -> Self {
        Self(self.0 & other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// only crc32 is requested, the header/trailer fast path applies
    pub fn is_crc_only(self) -> bool {
        self == Self::CRC_ONLY
    }

    pub fn iter(self) -> impl Iterator<Item = HashKind> {
        HashKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }
}

impl FromIterator<HashKind> for HashKinds {
    fn from_iter<I: IntoIterator<Item = HashKind>>(iter: I) -> Self {
        iter.into_iter().fold(HashKinds::NONE, HashKinds::with)
    }
}

/// the digests known for one artifact; any subset may be present
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hashes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crc32: Option<Crc32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<Md5>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<Sha1>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<Sha256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha384: Option<Sha384>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha512: Option<Sha512>,
}

/// absent on either side counts as agreement
fn conditional<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

impl Hashes {
    pub fn is_empty(&self) -> bool {
        self.kinds().is_empty()
    }

    /// which digests are present
    pub fn kinds(&self) -> HashKinds {
        HashKind::ALL
            .into_iter()
            .filter(|k| self.get(*k).is_some())
            .collect()
    }

    /// raw bytes of one digest, if present
    pub fn get(&self, kind: HashKind) -> Option<&[u8]> {
        match kind {
            HashKind::Crc32 => self.crc32.as_ref().map(|h| h.as_bytes().as_slice()),
            HashKind::Md5 => self.md5.as_ref().map(|h| h.as_bytes().as_slice()),
            HashKind::Sha1 => self.sha1.as_ref().map(|h| h.as_bytes().as_slice()),
            HashKind::Sha256 => self.sha256.as_ref().map(|h| h.as_bytes().as_slice()),
            HashKind::Sha384 => self.sha384.as_ref().map(|h| h.as_bytes().as_slice()),
            HashKind::Sha512 => self.sha512.as_ref().map(|h| h.as_bytes().as_slice()),
        }
    }

    /// at least one algorithm is present on both sides
    pub fn has_common(&self, other: &Hashes) -> bool {
        !self.kinds().intersect(other.kinds()).is_empty()
    }

    /// every algorithm present on both sides agrees
    pub fn conditional_eq(&self, other: &Hashes) -> bool {
        conditional(&self.crc32, &other.crc32)
            && conditional(&self.md5, &other.md5)
            && conditional(&self.sha1, &other.sha1)
            && conditional(&self.sha256, &other.sha256)
            && conditional(&self.sha384, &other.sha384)
            && conditional(&self.sha512, &other.sha512)
    }

    /// conditional equality backed by at least one shared digest
    pub fn matches(&self, other: &Hashes) -> bool {
        self.has_common(other) && self.conditional_eq(other)
    }

    /// copy every digest `other` has and `self` lacks; never overwrites
    pub fn fill_missing(&mut self, other: &Hashes) {
        self.crc32 = self.crc32.or(other.crc32);
        self.md5 = self.md5.or(other.md5);
        self.sha1 = self.sha1.or(other.sha1);
        self.sha256 = self.sha256.or(other.sha256);
        self.sha384 = self.sha384.or(other.sha384);
        self.sha512 = self.sha512.or(other.sha512);
    }

    /// hex of the first present digest in priority order
    pub fn first_token(&self) -> Option<String> {
        HashKind::ALL
            .into_iter()
            .find_map(|k| self.get(k).map(hex::encode))
    }
}

fn to_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut arr = [0u8; N];
    arr.copy_from_slice(bytes);
    arr
}

/// streaming hasher computing any subset of the supported digests at once
pub struct MultiHasher {
    crc32: Option<crc32fast::Hasher>,
    md5: Option<Md5Hasher>,
    sha1: Option<Sha1Hasher>,
    sha256: Option<Sha256Hasher>,
    sha384: Option<Sha384Hasher>,
    sha512: Option<Sha512Hasher>,
    size: u64,
}

impl MultiHasher {
    pub fn new(kinds: HashKinds) -> Self {
        Self {
            crc32: kinds
                .contains(HashKind::Crc32)
                .then(crc32fast::Hasher::new),
            md5: kinds.contains(HashKind::Md5).then(Md5Hasher::new),
            sha1: kinds.contains(HashKind::Sha1).then(Sha1Hasher::new),
            sha256: kinds.contains(HashKind::Sha256).then(Sha256Hasher::new),
            sha384: kinds.contains(HashKind::Sha384).then(Sha384Hasher::new),
            sha512: kinds.contains(HashKind::Sha512).then(Sha512Hasher::new),
            size: 0,
        }
    }

    /// feed content bytes
    pub fn update(&mut self, data: &[u8]) {
        if let Some(h) = self.crc32.as_mut() {
            h.update(data);
        }
        if let Some(h) = self.md5.as_mut() {
            h.update(data);
        }
        if let Some(h) = self.sha1.as_mut() {
            h.update(data);
        }
        if let Some(h) = self.sha256.as_mut() {
            h.update(data);
        }
        if let Some(h) = self.sha384.as_mut() {
            h.update(data);
        }
        if let Some(h) = self.sha512.as_mut() {
            h.update(data);
        }
        self.size += data.len() as u64;
    }

    /// finalize into digests and total size
    pub fn finalize(self) -> (Hashes, u64) {
        let hashes = Hashes {
            crc32: self.crc32.map(|h| Crc32::from_u32(h.finalize())),
            md5: self.md5.map(|h| Md5::from_bytes(to_array(&h.finalize()))),
            sha1: self.sha1.map(|h| Sha1::from_bytes(to_array(&h.finalize()))),
            sha256: self
                .sha256
                .map(|h| Sha256::from_bytes(to_array(&h.finalize()))),
            sha384: self
                .sha384
                .map(|h| Sha384::from_bytes(to_array(&h.finalize()))),
            sha512: self
                .sha512
                .map(|h| Sha512::from_bytes(to_array(&h.finalize()))),
        };
        (hashes, self.size)
    }
}

/// reader adapter that hashes everything read through it
pub struct HashingReader<R> {
    inner: R,
    hasher: MultiHasher,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R, kinds: HashKinds) -> Self {
        Self {
            inner,
            hasher: MultiHasher::new(kinds),
        }
    }

    /// finalize into digests and total bytes read
    pub fn finalize(self) -> (Hashes, u64) {
        self.hasher.finalize()
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// hash a whole reader
pub fn hash_reader<R: Read>(reader: R, kinds: HashKinds) -> io::Result<(Hashes, u64)> {
    let mut hashing = HashingReader::new(reader, kinds);
    io::copy(&mut hashing, &mut io::sink())?;
    Ok(hashing.finalize())
}

/// hash an in-memory buffer
pub fn hash_bytes(data: &[u8], kinds: HashKinds) -> Hashes {
    let mut hasher = MultiHasher::new(kinds);
    hasher.update(data);
    hasher.finalize().0
}
