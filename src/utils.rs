//! Small shared helpers: offset-local clock rendering and string trimming.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};

/// Current time in the configured fixed UTC offset.
pub fn local_now(offset_hours: i32) -> DateTime<FixedOffset> {
    let seconds = offset_hours.clamp(-23, 23) * 3600;
    let offset = FixedOffset::east_opt(seconds).unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
    Utc::now().with_timezone(&offset)
}

pub fn format_local_now(offset_hours: i32) -> String {
    local_now(offset_hours).format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn local_today(offset_hours: i32) -> String {
    local_now(offset_hours).format("%Y-%m-%d").to_string()
}

/// Parses a `HH:MM` wall-clock time.
pub fn parse_daily_time(value: &str) -> Option<(u32, u32)> {
    let (hour, minute) = value.trim().split_once(':')?;
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    if hour < 24 && minute < 60 {
        Some((hour, minute))
    } else {
        None
    }
}

/// Time until the next occurrence of `HH:MM` in the configured offset.
pub fn until_next_daily(hour: u32, minute: u32, offset_hours: i32) -> Duration {
    let now = local_now(offset_hours);
    let today = now.date_naive().and_hms_opt(hour, minute, 0);
    let Some(today) = today else {
        return Duration::from_secs(3600);
    };
    let target = if now.naive_local() < today {
        today
    } else {
        today + chrono::Duration::days(1)
    };
    (target - now.naive_local())
        .to_std()
        .unwrap_or(Duration::from_secs(60))
}

pub fn truncate(value: &str, max_len: usize) -> &str {
    match value.char_indices().nth(max_len) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_daily_time() {
        assert_eq!(parse_daily_time("09:00"), Some((9, 0)));
        assert_eq!(parse_daily_time("23:59"), Some((23, 59)));
        assert_eq!(parse_daily_time("24:00"), None);
        assert_eq!(parse_daily_time("whenever"), None);
    }

    #[test]
    fn next_daily_is_within_a_day() {
        let wait = until_next_daily(9, 0, 8);
        assert!(wait <= Duration::from_secs(24 * 3600));
        assert!(wait > Duration::ZERO);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 3), "hel");
        assert_eq!(truncate("héllo", 2), "hé");
    }
}
