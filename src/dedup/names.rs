use std::collections::HashMap;

use tracing::debug;

use crate::types::HashRecord;

/// split `name` into stem and extension (with its dot) within the last path segment
fn split_extension(name: &str) -> (&str, &str) {
    let segment_start = name.rfind('/').map_or(0, |i| i + 1);
    match name[segment_start..].rfind('.') {
        Some(dot) if dot > 0 => name.split_at(segment_start + dot),
        _ => (name, ""),
    }
}

fn suffixed(name: &str, suffix: &str) -> String {
    let (stem, ext) = split_extension(name);
    format!("{}_{}{}", stem, suffix, ext)
}

/// drop true duplicates and rename colliding names within each group
///
/// expects items sorted by group then name (see
/// [`sort_records`](crate::dedup::sort_records)). a record whose name is
/// already taken in its group is dropped when it is the same artifact as a
/// record holding that name, otherwise renamed to `stem_<token>.ext` where
/// the token is its first digest in crc32, md5, sha1, sha256, sha384, sha512
/// order. records without digests, and renames that would collide again,
/// fall back to a counter starting at 1 that resets whenever a name is
/// emitted without conflict.
pub fn resolve_names<T>(items: Vec<T>) -> Vec<T>
where
    T: AsRef<HashRecord> + AsMut<HashRecord>,
{
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    // (group, name) -> positions in `out` holding that name
    let mut taken: HashMap<(String, String), Vec<usize>> = HashMap::new();
    let mut last_renamed: Option<String> = None;
    let mut next_id = 1usize;

    for mut item in items {
        let record = item.as_ref();
        let group = record.parent().to_string();
        let key = (group.clone(), record.name.clone());

        let Some(holders) = taken.get(&key) else {
            next_id = 1;
            last_renamed = None;
            taken.entry(key).or_default().push(out.len());
            out.push(item);
            continue;
        };

        if holders
            .iter()
            .any(|&i| out[i].as_ref().same_artifact(record))
        {
            debug!(group = %group, name = %record.name, "dropping duplicate record");
            continue;
        }

        let by_digest = record
            .hashes
            .first_token()
            .map(|token| suffixed(&record.name, &token))
            .filter(|candidate| {
                last_renamed.as_deref() != Some(candidate.as_str())
                    && !taken.contains_key(&(group.clone(), candidate.clone()))
            });
        let new_name = match by_digest {
            Some(name) => name,
            None => loop {
                let candidate = suffixed(&record.name, &next_id.to_string());
                next_id += 1;
                if !taken.contains_key(&(group.clone(), candidate.clone())) {
                    break candidate;
                }
            },
        };

        debug!(group = %group, from = %record.name, to = %new_name, "renaming colliding record");
        item.as_mut().name = new_name.clone();
        last_renamed = Some(new_name.clone());
        taken.entry((group, new_name)).or_default().push(out.len());
        out.push(item);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{Crc32, Hashes, Md5};

    fn with_crc(name: &str, v: u32) -> HashRecord {
        HashRecord::new(name, "set").with_hashes(Hashes {
            crc32: Some(Crc32::from_u32(v)),
            ..Default::default()
        })
    }

    fn names(records: &[HashRecord]) -> Vec<&str> {
        records.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_collision_suffixing() {
        let records = vec![
            with_crc("rom.bin", 0xaaaa_aaaa),
            with_crc("rom.bin", 0xbbbb_bbbb),
            HashRecord::new("rom.bin", "set"),
        ];
        let resolved = resolve_names(records);
        assert_eq!(
            names(&resolved),
            vec!["rom.bin", "rom_bbbbbbbb.bin", "rom_1.bin"]
        );
    }

    #[test]
    fn test_counter_skips_taken_names() {
        let records = vec![
            with_crc("rom_1.bin", 7),
            with_crc("rom.bin", 1),
            HashRecord::new("rom.bin", "set"),
            HashRecord::new("rom.bin", "set"),
        ];
        let resolved = resolve_names(records);
        assert_eq!(
            names(&resolved),
            vec!["rom_1.bin", "rom.bin", "rom_2.bin", "rom_3.bin"]
        );
    }

    #[test]
    fn test_true_duplicates_dropped() {
        let records = vec![
            with_crc("rom.bin", 1),
            with_crc("rom.bin", 1),
            with_crc("rom.bin", 2),
            with_crc("rom.bin", 1),
        ];
        let resolved = resolve_names(records);
        assert_eq!(names(&resolved), vec!["rom.bin", "rom_00000002.bin"]);
    }

    #[test]
    fn test_repeated_digest_rename_falls_back_to_counter() {
        let md5_a = Some(Md5::from_bytes([1; 16]));
        let md5_b = Some(Md5::from_bytes([2; 16]));
        let first = with_crc("rom.bin", 1);
        let mut second = with_crc("rom.bin", 2);
        second.hashes.md5 = md5_a;
        let mut third = with_crc("rom.bin", 2);
        third.hashes.md5 = md5_b;

        let resolved = resolve_names(vec![first, second, third]);
        assert_eq!(
            names(&resolved),
            vec!["rom.bin", "rom_00000002.bin", "rom_1.bin"]
        );
    }

    #[test]
    fn test_groups_are_independent() {
        let records = vec![
            with_crc("rom.bin", 1),
            HashRecord::new("rom.bin", "other").with_hashes(Hashes {
                crc32: Some(Crc32::from_u32(2)),
                ..Default::default()
            }),
        ];
        let resolved = resolve_names(records);
        assert_eq!(names(&resolved), vec!["rom.bin", "rom.bin"]);
    }

    #[test]
    fn test_extension_split() {
        assert_eq!(split_extension("dir.v2/rom"), ("dir.v2/rom", ""));
        assert_eq!(split_extension("dir/.hidden"), ("dir/.hidden", ""));
        assert_eq!(split_extension("a/b.tar.gz"), ("a/b.tar", ".gz"));
        assert_eq!(suffixed("disk", "1"), "disk_1");
    }
}
