//! Text and number formatting helpers for bot messages

use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone, Utc};

use crate::localization::t_lang;

/// Human readable file size using 1024-based units
pub fn format_file_size(size: Option<i64>, language_code: Option<&str>) -> String {
    let Some(size) = size.filter(|s| *s >= 0) else {
        return t_lang("size-unknown", language_code);
    };

    const UNITS: [&str; 5] = ["unit-bytes", "unit-kb", "unit-mb", "unit-gb", "unit-tb"];

    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let unit_label = t_lang(UNITS[unit], language_code);
    if unit == 0 {
        format!("{} {}", size, unit_label)
    } else {
        format!("{:.1} {}", value, unit_label)
    }
}

/// Cut `text` to at most `max_chars` characters, ending with "..." when shortened
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars <= 3 {
        return text.chars().take(max_chars).collect();
    }
    let mut out: String = text.chars().take(max_chars - 3).collect();
    out.push_str("...");
    out
}

/// `dd.mm.yyyy HH:MM` in the given offset
pub fn format_datetime(dt: DateTime<Utc>, offset: FixedOffset) -> String {
    dt.with_timezone(&offset).format("%d.%m.%Y %H:%M").to_string()
}

/// Midnight of the calendar day containing `now`, as seen from `offset`
pub fn start_of_day(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local_date = now.with_timezone(&offset).date_naive();
    local_date
        .and_time(NaiveTime::MIN)
        .and_local_timezone(offset)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&local_date.and_time(NaiveTime::MIN)))
}

/// Page bounds for a list of `len` items.
///
/// Returns `(clamped_page, total_pages, start, end)`; an empty list still has one page.
pub fn paginate(len: usize, page: usize, per_page: usize) -> (usize, usize, usize, usize) {
    let per_page = per_page.max(1);
    let total_pages = len.div_ceil(per_page).max(1);
    let page = page.min(total_pages - 1);
    let start = (page * per_page).min(len);
    let end = (start + per_page).min(len);
    (page, total_pages, start, end)
}
