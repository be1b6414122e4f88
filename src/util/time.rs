//! Rate and duration formatting for reports

use std::time::Duration;

const BINARY_UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

/// Human-readable duration
///
/// ```
/// use std::time::Duration;
/// use iodrive::util::time::format_duration;
///
/// assert_eq!(format_duration(Duration::from_nanos(500)), "500ns");
/// assert_eq!(format_duration(Duration::from_micros(2500)), "2.50ms");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();
    match nanos {
        0..=999 => format!("{}ns", nanos),
        1_000..=999_999 => format!("{:.2}us", nanos as f64 / 1e3),
        1_000_000..=999_999_999 => format!("{:.2}ms", nanos as f64 / 1e6),
        _ => format!("{:.2}s", nanos as f64 / 1e9),
    }
}

/// Operations per second with a K/M/G suffix
pub fn format_rate(rate: f64) -> String {
    if rate < 1e3 {
        format!("{:.0}", rate)
    } else if rate < 1e6 {
        format!("{:.2}K", rate / 1e3)
    } else if rate < 1e9 {
        format!("{:.2}M", rate / 1e6)
    } else {
        format!("{:.2}G", rate / 1e9)
    }
}

/// Byte count scaled to the largest binary unit below it
pub fn format_bytes(bytes: u64) -> String {
    let (value, unit) = scale_binary(bytes as f64);
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", value, BINARY_UNITS[unit])
    }
}

/// Bytes per second scaled like [`format_bytes`]
pub fn format_throughput(bytes_per_sec: f64) -> String {
    let (value, unit) = scale_binary(bytes_per_sec);
    format!("{:.2} {}/s", value, BINARY_UNITS[unit])
}

fn scale_binary(mut value: f64) -> (f64, usize) {
    let mut unit = 0;
    while value >= 1024.0 && unit < BINARY_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    (value, unit)
}

/// Operations per second; zero for an empty interval
pub fn calculate_iops(operations: u64, duration: Duration) -> f64 {
    per_second(operations, duration)
}

/// Bytes per second; zero for an empty interval
pub fn calculate_throughput(bytes: u64, duration: Duration) -> f64 {
    per_second(bytes, duration)
}

fn per_second(count: u64, duration: Duration) -> f64 {
    let seconds = duration.as_secs_f64();
    if seconds > 0.0 {
        count as f64 / seconds
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_nanos(500)), "500ns");
        assert_eq!(format_duration(Duration::from_nanos(1500)), "1.50us");
        assert_eq!(format_duration(Duration::from_micros(1500)), "1.50ms");
        assert_eq!(format_duration(Duration::from_secs(5)), "5.00s");
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(500.0), "500");
        assert_eq!(format_rate(1500.0), "1.50K");
        assert_eq!(format_rate(2_500_000.0), "2.50M");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KiB");
        assert_eq!(format_bytes(10 * 1024 * 1024), "10.00 MiB");
    }

    #[test]
    fn test_format_throughput() {
        assert_eq!(format_throughput(500.0), "500.00 B/s");
        assert_eq!(format_throughput(1536.0 * 1024.0), "1.50 MiB/s");
    }

    #[test]
    fn test_rates() {
        assert_eq!(calculate_iops(1000, Duration::from_secs(10)), 100.0);
        assert_eq!(calculate_iops(1000, Duration::ZERO), 0.0);
        assert_eq!(calculate_throughput(10 << 20, Duration::from_secs(10)), 1048576.0);
    }
}
