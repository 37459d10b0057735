use std::collections::HashMap;

use tracing::trace;

use crate::hash::HashKind;
use crate::types::HashRecord;

type DigestIndex = HashMap<(HashKind, Vec<u8>), Vec<usize>>;

/// register every digest of `record` as pointing at `slot`
fn index_record(index: &mut DigestIndex, record: &HashRecord, slot: usize) {
    for kind in record.hashes.kinds().iter() {
        if let Some(bytes) = record.hashes.get(kind) {
            let slots = index.entry((kind, bytes.to_vec())).or_default();
            if !slots.contains(&slot) {
                slots.push(slot);
            }
        }
    }
}

/// earliest accumulated record that is the same artifact as `record`
fn find_match(index: &DigestIndex, out: &[HashRecord], record: &HashRecord) -> Option<usize> {
    let mut candidates: Vec<usize> = record
        .hashes
        .kinds()
        .iter()
        .filter_map(|kind| {
            let bytes = record.hashes.get(kind)?;
            index.get(&(kind, bytes.to_vec()))
        })
        .flatten()
        .copied()
        .collect();
    candidates.sort_unstable();
    candidates.dedup();
    candidates
        .into_iter()
        .find(|&i| record.same_artifact(&out[i]))
}

/// fold `incoming` into the record that already represents its artifact
///
/// digests are only ever added. the group identity moves to `incoming`
/// when it comes from an earlier source, or when the accumulated group is a
/// clone of (or takes roms from) the incoming group.
fn fold(acc: &mut HashRecord, incoming: HashRecord) {
    let dupe = incoming.duplicate_status(acc);
    acc.fill_missing(&incoming);
    if acc.dupe.is_none() {
        acc.dupe = dupe;
    }

    if incoming.source < acc.source {
        acc.source = incoming.source;
        acc.group = incoming.group;
        acc.name = incoming.name;
    } else if acc.group.is_child_of(&incoming.group.name) {
        acc.group = incoming.group;
        acc.name = incoming.name;
    }
}

/// fold duplicates in one left-to-right pass
///
/// the first record of each artifact seeds its slot in the output, later
/// matches are folded into it. nodump records pass through untouched.
pub fn merge(records: Vec<HashRecord>) -> Vec<HashRecord> {
    let mut out: Vec<HashRecord> = Vec::with_capacity(records.len());
    let mut index = DigestIndex::new();

    for record in records {
        if record.is_nodump() {
            out.push(record);
            continue;
        }
        match find_match(&index, &out, &record) {
            Some(slot) => {
                trace!(name = %record.name, into = %out[slot].name, "folding duplicate");
                fold(&mut out[slot], record);
                index_record(&mut index, &out[slot], slot);
            }
            None => {
                let slot = out.len();
                index_record(&mut index, &record, slot);
                out.push(record);
            }
        }
    }
    out
}

/// merge several collections, earlier collections taking precedence
///
/// each record is stamped with the index of the collection it came from.
pub fn merge_collections(collections: Vec<Vec<HashRecord>>) -> Vec<HashRecord> {
    let records = collections
        .into_iter()
        .enumerate()
        .flat_map(|(source, records)| {
            records.into_iter().map(move |mut r| {
                r.source = source;
                r
            })
        })
        .collect();
    merge(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{Crc32, Hashes, Md5, Sha1};
    use crate::types::{DupeMatch, DupeScope, Group, ItemStatus};

    fn crc(v: u32) -> Option<Crc32> {
        Some(Crc32::from_u32(v))
    }

    #[test]
    fn test_partial_digests_merge_into_one() {
        let md5 = Some(Md5::from_bytes([3; 16]));
        let sha1 = Some(Sha1::from_bytes([4; 20]));
        let a = HashRecord::new("rom.bin", "set").with_hashes(Hashes {
            crc32: crc(0x1234),
            md5,
            ..Default::default()
        });
        let b = HashRecord::new("rom.bin", "set").with_hashes(Hashes {
            md5,
            sha1,
            ..Default::default()
        });

        let merged = merge(vec![a, b]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].hashes.crc32, crc(0x1234));
        assert_eq!(merged[0].hashes.md5, md5);
        assert_eq!(merged[0].hashes.sha1, sha1);
        assert_eq!(
            merged[0].dupe,
            Some(crate::types::DupeType {
                scope: DupeScope::Internal,
                matched: DupeMatch::All
            })
        );
    }

    #[test]
    fn test_disjoint_digests_stay_apart() {
        let a = HashRecord::new("rom.bin", "set").with_hashes(Hashes {
            crc32: crc(1),
            ..Default::default()
        });
        let b = HashRecord::new("rom.bin", "set").with_hashes(Hashes {
            sha1: Some(Sha1::from_bytes([1; 20])),
            ..Default::default()
        });
        assert_eq!(merge(vec![a, b]).len(), 2);
    }

    #[test]
    fn test_first_seen_digest_wins() {
        let a = HashRecord::new("a", "s").with_hashes(Hashes {
            crc32: crc(9),
            ..Default::default()
        });
        let b = HashRecord::new("b", "s").with_hashes(Hashes {
            crc32: crc(9),
            md5: Some(Md5::from_bytes([1; 16])),
            ..Default::default()
        });
        // matches a through crc, then learns md5 from b
        let c = HashRecord::new("c", "s").with_hashes(Hashes {
            md5: Some(Md5::from_bytes([1; 16])),
            ..Default::default()
        });

        let merged = merge(vec![a, b, c]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "a");
        assert_eq!(merged[0].hashes.md5, Some(Md5::from_bytes([1; 16])));
    }

    #[test]
    fn test_nodumps_pass_through() {
        let a = HashRecord::new("x", "s").with_status(ItemStatus::Nodump);
        let b = HashRecord::new("x", "s").with_status(ItemStatus::Nodump);
        assert_eq!(merge(vec![a, b]).len(), 2);
    }

    #[test]
    fn test_earlier_source_takes_identity() {
        let hashes = Hashes {
            crc32: crc(5),
            ..Default::default()
        };
        let later = vec![HashRecord::new("late.bin", "late").with_hashes(hashes.clone())];
        let earlier = vec![HashRecord::new("early.bin", "early").with_hashes(hashes)];

        // the record from collection 1 arrives first in the stream
        let mut stream = merge_collections(vec![Vec::new(), later]);
        stream.extend(earlier);
        let merged = merge(stream);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source, 0);
        assert_eq!(merged[0].parent(), "early");
        assert_eq!(merged[0].name, "early.bin");
        assert_eq!(merged[0].dupe.map(|d| d.scope), Some(DupeScope::External));
    }

    #[test]
    fn test_child_group_repointed_at_parent() {
        let hashes = Hashes {
            crc32: crc(6),
            ..Default::default()
        };
        let mut clone = HashRecord::new("rom.bin", "clone").with_hashes(hashes.clone());
        clone.group = Group {
            name: "clone".into(),
            clone_of: Some("parent".into()),
            rom_of: None,
        };
        let parent = HashRecord::new("rom.bin", "parent").with_hashes(hashes);

        let merged = merge(vec![clone, parent]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].parent(), "parent");
    }

    #[test]
    fn test_collections_keep_precedence() {
        let hashes = Hashes {
            md5: Some(Md5::from_bytes([8; 16])),
            ..Default::default()
        };
        let first = vec![HashRecord::new("one.bin", "first").with_hashes(hashes.clone())];
        let second = vec![
            HashRecord::new("two.bin", "second").with_hashes(hashes),
            HashRecord::new("other.bin", "second").with_hashes(Hashes {
                crc32: crc(2),
                ..Default::default()
            }),
        ];

        let merged = merge_collections(vec![first, second]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].name, "one.bin");
        assert_eq!(merged[1].source, 1);
    }
}
