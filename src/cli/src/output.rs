//! Output helpers shared by the table-printing commands.

use chrono::{DateTime, Utc};
use comfy_table::{presets, ContentArrangement, Table};

/// Borderless column layout used by `ls` and `history`.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers);
    table
}

/// Render a byte count with a binary unit suffix.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Render a timestamp as a relative age like `3 hours ago`.
pub fn format_ago(dt: &DateTime<Utc>) -> String {
    let elapsed = Utc::now().signed_duration_since(*dt);
    if elapsed.num_seconds() < 0 {
        return "just now".to_string();
    }

    let (count, unit) = if elapsed.num_seconds() < 60 {
        (elapsed.num_seconds(), "seconds")
    } else if elapsed.num_minutes() < 60 {
        (elapsed.num_minutes(), "minutes")
    } else if elapsed.num_hours() < 24 {
        (elapsed.num_hours(), "hours")
    } else if elapsed.num_days() < 30 {
        (elapsed.num_days(), "days")
    } else if elapsed.num_days() < 365 {
        (elapsed.num_days() / 30, "months")
    } else {
        (elapsed.num_days() / 365, "years")
    };
    format!("{count} {unit} ago")
}

/// Render an RFC 3339 timestamp as a relative age, falling back to the
/// raw value when it does not parse.
pub fn format_timestamp(ts: &str) -> String {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| format_ago(&dt.with_timezone(&Utc)))
        .unwrap_or_else(|_| ts.to_string())
}

/// Truncate a string to `max_len`, appending an ellipsis.
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len.saturating_sub(3)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes_picks_unit() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1048576), "1.0 MB");
        assert_eq!(format_bytes(1073741824), "1.0 GB");
    }

    #[test]
    fn test_format_bytes_caps_at_largest_unit() {
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024 * 1024), "5120.0 GB");
    }

    #[test]
    fn test_truncate_str() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello", 5), "hello");
        assert_eq!(truncate_str("hello world", 8), "hello...");
        assert_eq!(truncate_str("hello world", 3), "...");
    }

    #[test]
    fn test_format_timestamp_valid() {
        assert!(format_timestamp("2024-01-01T00:00:00Z").ends_with("ago"));
    }

    #[test]
    fn test_format_timestamp_invalid() {
        assert_eq!(format_timestamp("not-a-date"), "not-a-date");
    }

    #[test]
    fn test_format_ago_units() {
        let now = Utc::now();
        assert_eq!(format_ago(&(now - chrono::Duration::seconds(30))), "30 seconds ago");
        assert_eq!(format_ago(&(now - chrono::Duration::minutes(5))), "5 minutes ago");
        assert_eq!(format_ago(&(now - chrono::Duration::hours(3))), "3 hours ago");
        assert_eq!(format_ago(&(now - chrono::Duration::days(2))), "2 days ago");
        assert_eq!(format_ago(&(now - chrono::Duration::days(60))), "2 months ago");
        assert_eq!(format_ago(&(now - chrono::Duration::days(730))), "2 years ago");
    }

    #[test]
    fn test_format_ago_future() {
        let future = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(format_ago(&future), "just now");
    }

    #[test]
    fn test_new_table_renders_headers() {
        let mut table = new_table(&["REPOSITORY", "TAG"]);
        table.add_row(["nginx", "latest"]);
        let rendered = table.to_string();
        assert!(rendered.contains("REPOSITORY"));
        assert!(rendered.contains("nginx"));
    }
}
