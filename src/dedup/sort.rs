use std::cmp::Ordering;

use crate::natural::natural_cmp;
use crate::types::HashRecord;

fn record_cmp(a: &HashRecord, b: &HashRecord) -> Ordering {
    natural_cmp(a.parent(), b.parent())
        .then_with(|| natural_cmp(&a.name, &b.name))
        .then_with(|| a.source.cmp(&b.source))
}

/// order records by group, then name, then source collection
///
/// the sort is stable, so records equal on all three keep their input order.
pub fn sort_records<T: AsRef<HashRecord>>(items: &mut [T]) {
    items.sort_by(|a, b| record_cmp(a.as_ref(), b.as_ref()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::resolve_names;
    use crate::hash::{Crc32, Hashes};

    #[test]
    fn test_sort_order() {
        let mut records = vec![
            HashRecord::new("rom10.bin", "set2"),
            HashRecord::new("rom9.bin", "set2"),
            HashRecord::new("b.bin", "set10").with_source(1),
            HashRecord::new("b.bin", "set10").with_source(0),
            HashRecord::new("z.bin", "set1"),
        ];
        sort_records(&mut records);
        let keys: Vec<_> = records
            .iter()
            .map(|r| format!("{}/{}#{}", r.parent(), r.name, r.source))
            .collect();
        assert_eq!(
            keys,
            vec![
                "set1/z.bin#0",
                "set2/rom9.bin#0",
                "set2/rom10.bin#0",
                "set10/b.bin#0",
                "set10/b.bin#1",
            ]
        );
    }

    #[test]
    fn test_sort_then_resolve() {
        let crc = |v: u32| Hashes {
            crc32: Some(Crc32::from_u32(v)),
            ..Default::default()
        };
        let mut records = vec![
            HashRecord::new("rom.bin", "set").with_hashes(crc(2)).with_source(1),
            HashRecord::new("other.bin", "set").with_hashes(crc(3)),
            HashRecord::new("rom.bin", "set").with_hashes(crc(1)),
        ];
        sort_records(&mut records);
        let resolved = resolve_names(records);
        let names: Vec<_> = resolved.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["other.bin", "rom.bin", "rom_00000002.bin"]);
        assert_eq!(resolved[1].hashes.crc32, Some(Crc32::from_u32(1)));
    }
}
