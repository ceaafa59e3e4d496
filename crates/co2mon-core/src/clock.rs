//! Wall clock for timestamping readings
//!
//! The device has no RTC backup; it knows the time only after SNTP succeeds.
//! [`WallClock`] keeps the offset between the monotonic embassy clock and Unix
//! time, and falls back to seconds since boot until an offset is set.

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Instant;
use embedded_sdmmc::{TimeSource, Timestamp};

const SECONDS_PER_DAY: u64 = 86_400;

/// FAT timestamps cannot represent anything before 1980.
const FAT_EPOCH_YEAR: i32 = 1980;

/// Source of the timestamps attached to readings.
pub trait Clock {
    /// Seconds since the Unix epoch, or since boot if the time is unknown.
    fn now(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> u64 {
        (**self).now()
    }
}

pub struct WallClock {
    /// Unix time at monotonic zero, once known
    epoch_offset: Mutex<CriticalSectionRawMutex, Cell<Option<u64>>>,
}

impl WallClock {
    pub const fn new() -> Self {
        Self {
            epoch_offset: Mutex::new(Cell::new(None)),
        }
    }

    /// Anchor the clock to a Unix time observed now.
    pub fn set_unix_time(&self, unix_secs: u64) {
        let uptime = Instant::now().as_secs();
        let offset = unix_secs.saturating_sub(uptime);
        self.epoch_offset.lock(|cell| cell.set(Some(offset)));
    }

    /// Whether [`Clock::now`] returns Unix time rather than uptime.
    pub fn is_synced(&self) -> bool {
        self.epoch_offset.lock(|cell| cell.get().is_some())
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for WallClock {
    fn now(&self) -> u64 {
        let offset = self.epoch_offset.lock(|cell| cell.get()).unwrap_or(0);
        offset + Instant::now().as_secs()
    }
}

impl TimeSource for WallClock {
    fn get_timestamp(&self) -> Timestamp {
        fat_timestamp(self.now())
    }
}

impl TimeSource for &WallClock {
    fn get_timestamp(&self) -> Timestamp {
        fat_timestamp(self.now())
    }
}

/// Convert Unix seconds into a FAT directory timestamp, clamped to 1980.
pub fn fat_timestamp(unix_secs: u64) -> Timestamp {
    let days = (unix_secs / SECONDS_PER_DAY) as i64;
    let secs_today = unix_secs % SECONDS_PER_DAY;

    let (year, month, day) = civil_from_days(days);
    if year < FAT_EPOCH_YEAR {
        return Timestamp {
            year_since_1970: (FAT_EPOCH_YEAR - 1970) as u8,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        };
    }

    Timestamp {
        year_since_1970: (year - 1970).min(u8::MAX as i32) as u8,
        zero_indexed_month: month - 1,
        zero_indexed_day: day - 1,
        hours: (secs_today / 3600) as u8,
        minutes: ((secs_today % 3600) / 60) as u8,
        seconds: (secs_today % 60) as u8,
    }
}

/// Days since 1970-01-01 to a proleptic Gregorian (year, month, day).
///
/// Howard Hinnant's `civil_from_days`:
/// <http://howardhinnant.github.io/date_algorithms.html>
pub fn civil_from_days(days_since_epoch: i64) -> (i32, u8, u8) {
    // Shift the epoch to 0000-03-01 so the leap day ends the year
    let z = days_since_epoch + 719_468;
    let era = (if z >= 0 { z } else { z - 146_096 }) / 146_097;
    let doe = (z - era * 146_097) as u64; // [0, 146096]
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365; // [0, 399]
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100); // [0, 365]
    let mp = (5 * doy + 2) / 153; // [0, 11], March = 0
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u8;
    let year = yoe as i64 + era * 400 + i64::from(month <= 2);

    (year as i32, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_civil_from_days() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(59), (1970, 3, 1));
        assert_eq!(civil_from_days(10_957), (2000, 1, 1));
        assert_eq!(civil_from_days(11_016), (2000, 2, 29));
        assert_eq!(civil_from_days(19_675), (2023, 11, 14));
        assert_eq!(civil_from_days(-1), (1969, 12, 31));
    }

    #[test]
    fn test_fat_timestamp() {
        // 2023-11-14 22:13:20 UTC
        let ts = fat_timestamp(1_700_000_000);
        assert_eq!(ts.year_since_1970, 53);
        assert_eq!(ts.zero_indexed_month, 10);
        assert_eq!(ts.zero_indexed_day, 13);
        assert_eq!((ts.hours, ts.minutes, ts.seconds), (22, 13, 20));
    }

    #[test]
    fn test_fat_timestamp_clamps_uptime_to_1980() {
        let ts = fat_timestamp(3_600);
        assert_eq!(ts.year_since_1970, 10);
        assert_eq!(ts.zero_indexed_month, 0);
        assert_eq!(ts.zero_indexed_day, 0);
    }

    #[test]
    fn test_wall_clock_sync() {
        let clock = WallClock::new();
        assert!(!clock.is_synced());
        assert!(clock.now() < 1_000_000);

        clock.set_unix_time(1_700_000_000);
        assert!(clock.is_synced());
        let now = clock.now();
        assert!((1_700_000_000..1_700_000_010).contains(&now));
    }
}
