use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Convert a SystemTime to Unix seconds, clamping times before the epoch to zero.
pub fn to_unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Convert Unix seconds back to a SystemTime, or `None` if the platform cannot
/// represent it.
pub fn from_unix_seconds(seconds: u64) -> Option<SystemTime> {
    UNIX_EPOCH.checked_add(Duration::from_secs(seconds))
}

/// Get the current system time as Unix seconds.
pub fn now_as_unix_seconds() -> u64 {
    to_unix_seconds(SystemTime::now())
}

/// Time elapsed since a Unix timestamp; zero for timestamps in the future.
pub fn age(seconds: u64) -> Duration {
    from_unix_seconds(seconds)
        .and_then(|then| SystemTime::now().duration_since(then).ok())
        .unwrap_or_default()
}
