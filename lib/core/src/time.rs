use std::time::SystemTime;

/// Returns the current unix timestamp (seconds elapsed since 1970-01-01).
#[inline]
pub fn timestamp_secs() -> u64 {
    timestamp_millis() / 1000
}

/// Returns the current unix timestamp in milliseconds. Open packets carry
/// their `at` field in this resolution.
#[inline]
pub fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("System clock is set before the unix epoch")
        .as_millis() as u64
}
