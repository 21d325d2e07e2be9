use chrono::TimeDelta;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Formats a unix mode as an `ls`-style permission string, e.g. `rwxr-xr-x`.
pub fn format_mode(mode: u32) -> String {
    const BITS: [(u32, char); 9] = [
        (0o400, 'r'),
        (0o200, 'w'),
        (0o100, 'x'),
        (0o040, 'r'),
        (0o020, 'w'),
        (0o010, 'x'),
        (0o004, 'r'),
        (0o002, 'w'),
        (0o001, 'x'),
    ];

    BITS.iter()
        .map(|&(bit, c)| if mode & bit != 0 { c } else { '-' })
        .collect()
}

/// Formats the age of a layer the way `docker history` does.
///
/// ## Examples
///
/// ```
/// use chrono::TimeDelta;
/// use monosquash::utils::human_duration;
///
/// assert_eq!(human_duration(TimeDelta::seconds(30)), "30 seconds");
/// assert_eq!(human_duration(TimeDelta::minutes(61)), "About an hour");
/// assert_eq!(human_duration(TimeDelta::days(3)), "3 days");
/// ```
pub fn human_duration(delta: TimeDelta) -> String {
    let seconds = delta.num_seconds();
    let minutes = delta.num_minutes();
    let hours = delta.num_hours();

    if seconds < 1 {
        "Less than a second".to_string()
    } else if seconds < 60 {
        format!("{seconds} seconds")
    } else if minutes == 1 {
        "About a minute".to_string()
    } else if minutes < 60 {
        format!("{minutes} minutes")
    } else if hours == 1 {
        "About an hour".to_string()
    } else if hours < 48 {
        format!("{hours} hours")
    } else if hours < 24 * 7 * 2 {
        format!("{} days", hours / 24)
    } else if hours < 24 * 30 * 3 {
        format!("{} weeks", hours / 24 / 7)
    } else if hours < 24 * 365 * 2 {
        format!("{} months", hours / 24 / 30)
    } else {
        format!("{:.1} years", hours as f64 / 24.0 / 365.0)
    }
}

/// Formats a byte count using decimal units, e.g. `4.2 MB`.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["kB", "MB", "GB", "TB", "PB"];

    if bytes < 1000 {
        return format!("{bytes} B");
    }

    let mut size = bytes as f64;
    let mut unit = "B";
    for next in UNITS {
        if size < 1000.0 {
            break;
        }
        size /= 1000.0;
        unit = next;
    }

    format!("{size:.1} {unit}")
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mode() {
        assert_eq!(format_mode(0o755), "rwxr-xr-x");
        assert_eq!(format_mode(0o100644), "rw-r--r--");
        assert_eq!(format_mode(0o000), "---------");
    }

    #[test]
    fn test_human_duration_buckets() {
        assert_eq!(human_duration(TimeDelta::zero()), "Less than a second");
        assert_eq!(human_duration(TimeDelta::seconds(90)), "About a minute");
        assert_eq!(human_duration(TimeDelta::minutes(45)), "45 minutes");
        assert_eq!(human_duration(TimeDelta::hours(5)), "5 hours");
        assert_eq!(human_duration(TimeDelta::weeks(3)), "3 weeks");
        assert_eq!(human_duration(TimeDelta::days(100)), "3 months");
        assert_eq!(human_duration(TimeDelta::days(365 * 3)), "3.0 years");
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(0), "0 B");
        assert_eq!(human_size(999), "999 B");
        assert_eq!(human_size(1500), "1.5 kB");
        assert_eq!(human_size(4_200_000), "4.2 MB");
    }
}
