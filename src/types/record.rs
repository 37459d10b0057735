use serde::{Deserialize, Serialize};

use crate::hash::Hashes;
use crate::types::ArchiveEntry;

/// dump status of an artifact as declared by its catalog
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    None,
    Good,
    BadDump,
    Nodump,
    Verified,
}

/// the logical group (set) a record belongs to
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_of: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rom_of: Option<String>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clone_of: None,
            rom_of: None,
        }
    }

    /// this group is a clone of, or takes roms from, `parent`
    pub fn is_child_of(&self, parent: &str) -> bool {
        self.clone_of.as_deref() == Some(parent) || self.rom_of.as_deref() == Some(parent)
    }
}

/// whether a duplicate came from the same source collection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DupeScope {
    Internal,
    External,
}

/// how much of a duplicate matched
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DupeMatch {
    /// hashes only
    Hash,
    /// hashes, name and group
    All,
}

/// informational classification of an accepted duplicate match
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DupeType {
    pub scope: DupeScope,
    pub matched: DupeMatch,
}

/// the artifact identity the core works with
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashRecord {
    /// file name within its group
    pub name: String,
    pub group: Group,
    /// byte length; None means unknown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(flatten)]
    pub hashes: Hashes,
    #[serde(default)]
    pub status: ItemStatus,
    /// catalog date string, used for real-date timestamps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// index of the source collection this record came from
    #[serde(default)]
    pub source: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dupe: Option<DupeType>,
}

impl HashRecord {
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: Group::new(group),
            ..Default::default()
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_hashes(mut self, hashes: Hashes) -> Self {
        self.hashes = hashes;
        self
    }

    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_source(mut self, source: usize) -> Self {
        self.source = source;
        self
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    /// record for a container entry, carrying only what its table knows
    pub fn from_entry(entry: &ArchiveEntry, group: &str) -> Self {
        let mut record = Self::new(entry.path.clone(), group).with_size(entry.size);
        record.hashes.crc32 = entry.crc32;
        record
    }

    /// logical group name
    pub fn parent(&self) -> &str {
        &self.group.name
    }

    pub fn is_nodump(&self) -> bool {
        self.status == ItemStatus::Nodump
    }

    fn sizes_agree(&self, other: &HashRecord) -> bool {
        match (self.size, other.size) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }

    /// whether both records describe the same logical artifact
    ///
    /// hashless nodumps match on name alone. everything else needs at least
    /// one digest present on both sides, every shared digest equal, and
    /// sizes that agree when both are known.
    pub fn same_artifact(&self, other: &HashRecord) -> bool {
        if self.is_nodump()
            && other.is_nodump()
            && self.hashes.is_empty()
            && other.hashes.is_empty()
        {
            return self.name == other.name;
        }
        self.hashes.matches(&other.hashes) && self.sizes_agree(other)
    }

    /// classify `self` as a duplicate of `existing`, None when not the same artifact
    pub fn duplicate_status(&self, existing: &HashRecord) -> Option<DupeType> {
        if !self.same_artifact(existing) {
            return None;
        }
        let scope = if self.source == existing.source {
            DupeScope::Internal
        } else {
            DupeScope::External
        };
        let matched = if self.name == existing.name && self.parent() == existing.parent() {
            DupeMatch::All
        } else {
            DupeMatch::Hash
        };
        Some(DupeType { scope, matched })
    }

    /// back-fill digests and size from another record of the same artifact
    pub fn fill_missing(&mut self, other: &HashRecord) {
        self.hashes.fill_missing(&other.hashes);
        if self.size.is_none() {
            self.size = other.size;
        }
    }
}

impl AsRef<HashRecord> for HashRecord {
    fn as_ref(&self) -> &HashRecord {
        self
    }
}

impl AsMut<HashRecord> for HashRecord {
    fn as_mut(&mut self) -> &mut HashRecord {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{Crc32, Md5, Sha1};

    fn crc(v: u32) -> Option<Crc32> {
        Some(Crc32::from_u32(v))
    }

    #[test]
    fn test_crc_only_vs_sha1_only_not_equal() {
        let a = HashRecord::new("a.bin", "set").with_hashes(Hashes {
            crc32: crc(0xdeadbeef),
            ..Default::default()
        });
        let b = HashRecord::new("a.bin", "set").with_hashes(Hashes {
            sha1: Some(Sha1::from_bytes([1; 20])),
            ..Default::default()
        });
        assert!(!a.same_artifact(&b));
        assert!(a.duplicate_status(&b).is_none());
    }

    #[test]
    fn test_partial_digest_match() {
        let md5 = Some(Md5::from_bytes([9; 16]));
        let a = HashRecord::new("a.bin", "set").with_hashes(Hashes {
            crc32: crc(1),
            md5,
            ..Default::default()
        });
        let b = HashRecord::new("b.bin", "other").with_hashes(Hashes {
            md5,
            sha1: Some(Sha1::from_bytes([2; 20])),
            ..Default::default()
        });
        assert!(a.same_artifact(&b));

        let mut merged = a.clone();
        merged.fill_missing(&b);
        assert_eq!(merged.hashes.crc32, crc(1));
        assert_eq!(merged.hashes.md5, md5);
        assert_eq!(merged.hashes.sha1, Some(Sha1::from_bytes([2; 20])));
    }

    #[test]
    fn test_conflicting_shared_digest() {
        let a = HashRecord::new("a", "s").with_hashes(Hashes {
            crc32: crc(1),
            md5: Some(Md5::from_bytes([1; 16])),
            ..Default::default()
        });
        let b = HashRecord::new("a", "s").with_hashes(Hashes {
            crc32: crc(1),
            md5: Some(Md5::from_bytes([2; 16])),
            ..Default::default()
        });
        assert!(!a.same_artifact(&b));
    }

    #[test]
    fn test_size_mismatch_breaks_match() {
        let hashes = Hashes {
            crc32: crc(5),
            ..Default::default()
        };
        let a = HashRecord::new("a", "s").with_hashes(hashes.clone()).with_size(10);
        let b = HashRecord::new("a", "s").with_hashes(hashes.clone()).with_size(11);
        let unknown = HashRecord::new("a", "s").with_hashes(hashes);
        assert!(!a.same_artifact(&b));
        assert!(a.same_artifact(&unknown));
    }

    #[test]
    fn test_nodump_matches_by_name() {
        let a = HashRecord::new("x.bin", "s").with_status(ItemStatus::Nodump);
        let b = HashRecord::new("x.bin", "t").with_status(ItemStatus::Nodump);
        let c = HashRecord::new("y.bin", "s").with_status(ItemStatus::Nodump);
        assert!(a.same_artifact(&b));
        assert!(!a.same_artifact(&c));
    }

    #[test]
    fn test_hashless_records_never_match() {
        let a = HashRecord::new("x.bin", "s");
        let b = HashRecord::new("x.bin", "s");
        assert!(!a.same_artifact(&b));
    }

    #[test]
    fn test_duplicate_classification() {
        let hashes = Hashes {
            crc32: crc(7),
            ..Default::default()
        };
        let base = HashRecord::new("a", "s").with_hashes(hashes.clone());

        let same = base.clone();
        assert_eq!(
            same.duplicate_status(&base),
            Some(DupeType {
                scope: DupeScope::Internal,
                matched: DupeMatch::All
            })
        );

        let renamed_external = HashRecord::new("b", "s")
            .with_hashes(hashes)
            .with_source(1);
        assert_eq!(
            renamed_external.duplicate_status(&base),
            Some(DupeType {
                scope: DupeScope::External,
                matched: DupeMatch::Hash
            })
        );
    }

    #[test]
    fn test_group_child() {
        let mut g = Group::new("clone");
        g.clone_of = Some("parent".into());
        assert!(g.is_child_of("parent"));
        assert!(!g.is_child_of("other"));
    }

    #[test]
    fn test_record_json_flattens_hashes() {
        let r = HashRecord::new("a.bin", "set")
            .with_size(3)
            .with_hashes(Hashes {
                crc32: crc(0x352441c2),
                ..Default::default()
            });
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"crc32\":\"352441c2\""));
        let back: HashRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
