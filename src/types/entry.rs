use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::hash::Crc32;
use crate::natural::is_directory_marker;

/// packed ms-dos date/time pair as stored in zip headers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DosDateTime {
    pub date: u16,
    pub time: u16,
}

impl DosDateTime {
    /// 1996-12-24 23:32:00, the fixed stamp used when real dates are off
    pub const DEFAULT: DosDateTime = DosDateTime {
        date: 0x2198,
        time: 0xBC00,
    };

    /// pack a calendar timestamp; None outside the representable 1980..=2107 range
    pub fn from_naive(dt: NaiveDateTime) -> Option<Self> {
        let year = dt.year();
        if !(1980..=2107).contains(&year) {
            return None;
        }
        let date = (((year - 1980) as u16) << 9) | ((dt.month() as u16) << 5) | dt.day() as u16;
        let time =
            ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() as u16 / 2);
        Some(Self { date, time })
    }

    /// unpack into a calendar timestamp; None for invalid packed fields
    pub fn to_naive(self) -> Option<NaiveDateTime> {
        let year = 1980 + i32::from(self.date >> 9);
        let month = u32::from((self.date >> 5) & 0x0f);
        let day = u32::from(self.date & 0x1f);
        let hour = u32::from(self.time >> 11);
        let minute = u32::from((self.time >> 5) & 0x3f);
        let second = u32::from(self.time & 0x1f) * 2;
        NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
    }

    /// parse a catalog date string
    ///
    /// accepts `yyyy/mm/dd hh:mm:ss`, `yyyy-mm-dd hh:mm:ss`, the same
    /// without seconds or without a time, and a bare year.
    pub fn parse(s: &str) -> Option<Self> {
        const DATETIME_FORMATS: [&str; 5] = [
            "%Y/%m/%d %H:%M:%S",
            "%Y-%m-%d %H:%M:%S",
            "%Y-%m-%dT%H:%M:%S",
            "%Y/%m/%d %H:%M",
            "%Y-%m-%d %H:%M",
        ];
        const DATE_FORMATS: [&str; 2] = ["%Y/%m/%d", "%Y-%m-%d"];

        let s = s.trim();
        for fmt in DATETIME_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
                return Self::from_naive(dt);
            }
        }
        for fmt in DATE_FORMATS {
            if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
                return Self::from_naive(d.and_hms_opt(0, 0, 0)?);
            }
        }
        if s.len() == 4 {
            if let Ok(year) = s.parse::<i32>() {
                return Self::from_naive(NaiveDate::from_ymd_opt(year, 1, 1)?.and_hms_opt(0, 0, 0)?);
            }
        }
        None
    }

    /// windows FILETIME (100ns ticks since 1601-01-01)
    pub fn to_filetime(self) -> Option<u64> {
        const EPOCH_DIFF_SECS: i64 = 11_644_473_600;
        let secs = self.to_naive()?.and_utc().timestamp() + EPOCH_DIFF_SECS;
        u64::try_from(secs).ok().map(|s| s * 10_000_000)
    }

    /// inverse of [`DosDateTime::to_filetime`]
    pub fn from_filetime(ticks: u64) -> Option<Self> {
        const EPOCH_DIFF_SECS: i64 = 11_644_473_600;
        let secs = i64::try_from(ticks / 10_000_000).ok()? - EPOCH_DIFF_SECS;
        let dt = chrono::DateTime::from_timestamp(secs, 0)?.naive_utc();
        Self::from_naive(dt)
    }
}

impl Default for DosDateTime {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// one entry as listed by a container
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// path inside the container; directory markers end with `/`
    pub path: String,
    pub size: u64,
    pub compressed_size: u64,
    pub crc32: Option<Crc32>,
    pub modified: Option<DosDateTime>,
}

impl ArchiveEntry {
    pub fn file(path: impl Into<String>, size: u64, crc32: Option<Crc32>) -> Self {
        Self {
            path: path.into(),
            size,
            compressed_size: 0,
            crc32,
            modified: None,
        }
    }

    pub fn is_directory(&self) -> bool {
        is_directory_marker(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_stamp_unpacks() {
        let dt = DosDateTime::DEFAULT.to_naive().unwrap();
        assert_eq!(dt.to_string(), "1996-12-24 23:32:00");
        assert_eq!(DosDateTime::from_naive(dt), Some(DosDateTime::DEFAULT));
    }

    #[test]
    fn test_parse_formats() {
        let full = DosDateTime::parse("1996/12/24 23:32:00").unwrap();
        assert_eq!(full, DosDateTime::DEFAULT);
        assert_eq!(DosDateTime::parse("1996-12-24 23:32:00"), Some(full));

        let date_only = DosDateTime::parse("2001/02/03").unwrap();
        assert_eq!(date_only.to_naive().unwrap().to_string(), "2001-02-03 00:00:00");

        let year = DosDateTime::parse("1999").unwrap();
        assert_eq!(year.to_naive().unwrap().to_string(), "1999-01-01 00:00:00");
    }

    #[test]
    fn test_parse_rejects_garbage_and_range() {
        assert!(DosDateTime::parse("yesterday").is_none());
        assert!(DosDateTime::parse("1970/01/01").is_none());
    }

    #[test]
    fn test_seconds_have_two_second_resolution() {
        let a = DosDateTime::parse("2000/01/01 10:00:05").unwrap();
        assert_eq!(a.to_naive().unwrap().to_string(), "2000-01-01 10:00:04");
    }

    #[test]
    fn test_filetime_roundtrip() {
        let ft = DosDateTime::DEFAULT.to_filetime().unwrap();
        assert_eq!(DosDateTime::from_filetime(ft), Some(DosDateTime::DEFAULT));
    }

    #[test]
    fn test_directory_entry() {
        assert!(ArchiveEntry::file("dir/", 0, None).is_directory());
        assert!(!ArchiveEntry::file("dir/file", 0, None).is_directory());
    }
}
