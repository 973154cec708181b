use std::time::{SystemTime, UNIX_EPOCH};

/// Timestamp type - milliseconds since the Unix epoch
pub type TimestampMs = u64;

/// Fixed key under which index containers store their ordered id list
pub const INDEX_ORDER_KEY: &str = "order";

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as TimestampMs
}

/// Milliseconds elapsed between `earlier` and `now`, saturating at zero
/// if the clock moved backwards
pub fn millis_since(now: TimestampMs, earlier: TimestampMs) -> u64 {
    now.saturating_sub(earlier)
}
