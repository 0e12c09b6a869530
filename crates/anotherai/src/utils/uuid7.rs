//! UUIDv7 helpers.
//!
//! Completion ids are UUIDv7: the creation timestamp lives in the first 48
//! bits, so `created_at` is derived from the id instead of being stored.

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

/// Regexp matching a UUIDv7 in canonical form.
pub const UUID7_REGEXP: &str =
    "^[0-9a-f]{8}-[0-9a-f]{4}-7[0-9a-f]{3}-[0-9a-f]{4}-[0-9a-f]{12}$";

/// Generate a new UUIDv7 for the current instant.
pub fn uuid7() -> Uuid {
    Uuid::now_v7()
}

/// Build a UUIDv7 from an explicit millisecond timestamp and random bits.
/// Used by tests and by deterministic id derivation.
pub fn uuid7_from_parts(unix_ms: u64, random: u128) -> Uuid {
    // 48-bit timestamp | 4-bit version | 12-bit rand_a | 2-bit variant | 62-bit rand_b
    let mut value: u128 = (u128::from(unix_ms) & 0xFFFF_FFFF_FFFF) << 80;
    value |= 0x7 << 76;
    value |= ((random >> 62) & 0x0FFF) << 64;
    value |= 0b10 << 62;
    value |= random & 0x3FFF_FFFF_FFFF_FFFF;
    Uuid::from_u128(value)
}

/// The all-zero UUID, used as a sentinel for "no completion".
pub fn uuid_zero() -> Uuid {
    Uuid::nil()
}

/// Whether the UUID is the all-zero sentinel.
pub fn is_zero(id: &Uuid) -> bool {
    id.is_nil()
}

/// Whether the UUID carries version 7.
pub fn is_uuid7(id: &Uuid) -> bool {
    id.get_version_num() == 7
}

/// Millisecond-precision generation time embedded in a UUIDv7.
///
/// Returns the Unix epoch for non-v7 UUIDs so callers always get a valid
/// timestamp for legacy ids.
pub fn generation_time(id: &Uuid) -> DateTime<Utc> {
    if !is_uuid7(id) {
        return Utc.timestamp_millis_opt(0).single().unwrap_or_default();
    }
    let ms = (id.as_u128() >> 80) as i64;
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_time_round_trips() {
        let ms = 1_704_067_200_000; // 2024-01-01T00:00:00Z
        let id = uuid7_from_parts(ms, 42);
        assert!(is_uuid7(&id));
        assert_eq!(generation_time(&id).timestamp_millis(), ms as i64);
    }

    #[test]
    fn now_v7_is_recent() {
        let id = uuid7();
        let delta = (Utc::now() - generation_time(&id)).num_seconds().abs();
        assert!(delta < 5, "embedded timestamp drifted by {delta}s");
    }

    #[test]
    fn non_v7_uuids_are_rejected() {
        let v4 = Uuid::new_v4();
        assert!(!is_uuid7(&v4));
        assert_eq!(generation_time(&v4).timestamp_millis(), 0);
    }

    #[test]
    fn zero_uuid_is_detected() {
        assert!(is_zero(&uuid_zero()));
        assert!(!is_zero(&uuid7()));
    }

    #[test]
    fn regexp_matches_generated_ids() {
        let re = regex::Regex::new(UUID7_REGEXP).unwrap();
        assert!(re.is_match(&uuid7().to_string()));
        assert!(!re.is_match(&Uuid::new_v4().to_string()));
    }
}
