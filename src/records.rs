//! Standard record builders and ASTM timestamp helpers.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::protocol::constants::{HEADER_RECORD, TERMINATOR_RECORD};
use crate::protocol::record::FieldValue;

/// Parse a date time string in ASTM format (YYYYMMDD with optional HHMMSS)
pub fn parse_datetime(dt_str: &str) -> Option<DateTime<Utc>> {
    if dt_str.len() < 8 || !dt_str.is_char_boundary(8) {
        return None;
    }

    // Parse at least YYYYMMDD
    let year = dt_str[0..4].parse::<i32>().ok()?;
    let month = dt_str[4..6].parse::<u32>().ok()?;
    let day = dt_str[6..8].parse::<u32>().ok()?;

    // Default time components
    let mut hour = 0;
    let mut min = 0;
    let mut sec = 0;

    // Parse optional time components
    if dt_str.len() >= 10 {
        hour = dt_str[8..10].parse::<u32>().unwrap_or(0);
    }
    if dt_str.len() >= 12 {
        min = dt_str[10..12].parse::<u32>().unwrap_or(0);
    }
    if dt_str.len() >= 14 {
        sec = dt_str[12..14].parse::<u32>().unwrap_or(0);
    }

    let datetime = NaiveDateTime::new(
        chrono::NaiveDate::from_ymd_opt(year, month, day)?,
        chrono::NaiveTime::from_hms_opt(hour, min, sec)?,
    );

    Some(DateTime::<Utc>::from_naive_utc_and_offset(datetime, Utc))
}

/// Format a datetime to ASTM format string
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y%m%d%H%M%S").to_string()
}

/// Build a standard header record: delimiter declaration, sender and
/// receiver names, production processing id, standard version, timestamp.
pub fn header_record(sender: &str, receiver: &str) -> Vec<FieldValue> {
    let mut fields = vec![FieldValue::Null; 14];
    fields[0] = FieldValue::text(HEADER_RECORD.to_string());
    fields[1] = FieldValue::text(r"\^&");
    fields[4] = FieldValue::text(sender);
    fields[9] = FieldValue::text(receiver);
    fields[11] = FieldValue::text("P"); // Processing ID: Production
    fields[12] = FieldValue::text("E1394-97"); // ASTM version
    fields[13] = FieldValue::Text(format_datetime(&Utc::now()));
    fields
}

/// Build a terminator record with normal termination status.
pub fn terminator_record() -> Vec<FieldValue> {
    vec![
        FieldValue::text(TERMINATOR_RECORD.to_string()),
        FieldValue::text("1"), // Sequence number
        FieldValue::text("N"), // Normal termination
    ]
}
