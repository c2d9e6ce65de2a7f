//! Small helpers shared across the binaries: a 1-based counting range
//! (grounded in `multio-hammer.cc`'s `sequence(count, start)`, used
//! there to loop over steps/levels/params) and human-readable
//! formatters for logging.

use std::time::Duration;

/// `1..=count` shifted to start at `start`, matching the original
/// tool's `sequence(count, start)` helper — e.g. `sequence(3, 1)`
/// yields `1, 2, 3`.
pub fn sequence(count: u64, start: u64) -> impl Iterator<Item = u64> {
    start..(start + count)
}

/// Format a duration the way an operator reads it in a log line:
/// sub-millisecond as `"123.4µs"`, sub-second as `"123.4ms"`, otherwise
/// `"12.3s"`.
pub fn format_duration(d: Duration) -> String {
    let micros = d.as_secs_f64() * 1_000_000.0;
    if micros < 1_000.0 {
        format!("{micros:.1}\u{b5}s")
    } else if micros < 1_000_000.0 {
        format!("{:.1}ms", micros / 1_000.0)
    } else {
        format!("{:.1}s", micros / 1_000_000.0)
    }
}

/// Format a byte count with a binary unit suffix (`B`, `KiB`, `MiB`,
/// `GiB`).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}{}", UNITS[0])
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_counts_from_start() {
        assert_eq!(sequence(3, 1).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(sequence(4, 0).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn formats_bytes_in_binary_units() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.0KiB");
        assert_eq!(format_bytes(64 * 1024 * 1024), "64.0MiB");
    }

    #[test]
    fn formats_durations_by_magnitude() {
        assert!(format_duration(Duration::from_micros(5)).ends_with("\u{b5}s"));
        assert!(format_duration(Duration::from_millis(5)).ends_with("ms"));
        assert!(format_duration(Duration::from_secs(5)).ends_with('s'));
    }
}
