use std::time::Duration;

/// Formats a duration the way log lines throughout this crate expect it:
/// seconds with millisecond precision, e.g. `0.003s`.
pub fn format_time(d: Duration) -> String {
    format!("{:.3}s", d.as_secs_f64())
}

/// A short, stable hash of a string, used to keep thread names readable
/// (`writer-<hash>`) instead of embedding an entire endpoint URL.
pub fn short_hash(s: &str) -> String {
    format!("{:08x}", crc32fast::hash(s.as_bytes()))
}
