use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::{se, Result};

/// Parse an ISO-8601 timestamp. Values without an offset are taken to be UTC.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|e| se!("invalid timestamp {:?}: {}", s, e))?;
    Ok(Utc.from_utc_datetime(&naive))
}

/// Number of pages needed to show `total` items, `page_size` at a time
pub fn total_pages(total: u64, page_size: u32) -> u32 {
    let page_size = u64::from(page_size.max(1));
    ((total + page_size - 1) / page_size) as u32
}

/// Lenient positive-integer query parameter. Anything missing, malformed
/// or zero falls back to `default`.
pub fn positive_or(value: Option<&str>, default: u32) -> u32 {
    value
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
}
