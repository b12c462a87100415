//! Conversion of store timestamps (100ns ticks since 1601-01-01) to UTC instants.

use chrono::{DateTime, Utc};

/// Ticks between 1601-01-01 and 1970-01-01.
pub const EPOCH_DELTA_TICKS: u64 = 116_444_736_000_000_000;

/// Ticks per second.
pub const TICKS_PER_SECOND: u64 = 10_000_000;

/// Combine the low/high halves of a store timestamp into a tick count.
#[must_use]
pub fn ticks_from_parts(low: u32, high: u32) -> u64 {
    (u64::from(high) << 32) | u64::from(low)
}

/// Convert a tick count to a UTC instant.
///
/// Values at or before the Unix epoch clamp to the epoch.
#[must_use]
pub fn ticks_to_datetime(ticks: u64) -> DateTime<Utc> {
    if ticks <= EPOCH_DELTA_TICKS {
        return DateTime::UNIX_EPOCH;
    }

    let since_epoch = ticks - EPOCH_DELTA_TICKS;
    let secs = since_epoch / TICKS_PER_SECOND;
    let nanos = (since_epoch % TICKS_PER_SECOND) * 100;

    // Out-of-range values saturate.
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, nanos as u32))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Convert the low/high halves of a store timestamp to a UTC instant.
#[must_use]
pub fn filetime_to_datetime(low: u32, high: u32) -> DateTime<Utc> {
    ticks_to_datetime(ticks_from_parts(low, high))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn split(ticks: u64) -> (u32, u32) {
        (ticks as u32, (ticks >> 32) as u32)
    }

    #[test]
    fn epoch_delta_maps_to_unix_epoch() {
        let (low, high) = split(EPOCH_DELTA_TICKS);
        assert_eq!(filetime_to_datetime(low, high), DateTime::UNIX_EPOCH);
    }

    #[test]
    fn one_second_past_epoch() {
        let (low, high) = split(EPOCH_DELTA_TICKS + 10_000_000);
        assert_eq!(filetime_to_datetime(low, high).timestamp(), 1);
    }

    #[test]
    fn values_before_epoch_clamp() {
        assert_eq!(filetime_to_datetime(0, 0), DateTime::UNIX_EPOCH);
        let (low, high) = split(EPOCH_DELTA_TICKS - 1);
        assert_eq!(filetime_to_datetime(low, high), DateTime::UNIX_EPOCH);
    }

    #[test]
    fn high_and_low_halves_combine() {
        assert_eq!(ticks_from_parts(0x0000_0001, 0x0000_0002), 0x0000_0002_0000_0001);
    }

    #[test]
    fn known_certificate_expiry() {
        // 2030-01-01T00:00:00Z
        let expected = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let ticks = EPOCH_DELTA_TICKS + expected.timestamp() as u64 * TICKS_PER_SECOND;
        let (low, high) = split(ticks);
        assert_eq!(filetime_to_datetime(low, high), expected);
    }

    #[test]
    fn sub_second_ticks_are_kept() {
        let dt = ticks_to_datetime(EPOCH_DELTA_TICKS + 5_000_000);
        assert_eq!(dt.timestamp(), 0);
        assert_eq!(dt.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn max_ticks_do_not_panic() {
        let _ = ticks_to_datetime(u64::MAX);
    }
}
