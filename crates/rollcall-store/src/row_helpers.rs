//! Column extraction that reports bad rows as `StoreError::CorruptRow`.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Parse a string into an enum, returning CorruptRow on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

/// Canonical text form for timestamps stored in the database.
///
/// Fixed precision keeps lexical order equal to chronological order.
pub fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::AttendanceStatus;

    #[test]
    fn parse_enum_success() {
        let result: Result<AttendanceStatus, _> = parse_enum("present", "attendance", "status");
        assert_eq!(result.unwrap(), AttendanceStatus::Present);
    }

    #[test]
    fn parse_enum_failure() {
        let result: Result<AttendanceStatus, _> = parse_enum("late", "attendance", "status");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "attendance", column: "status", .. })
        ));
    }

    #[test]
    fn timestamps_sort_chronologically() {
        let early = DateTime::parse_from_rfc3339("2026-03-01T09:00:00Z").unwrap().with_timezone(&Utc);
        let late = DateTime::parse_from_rfc3339("2026-03-01T10:30:00.5Z").unwrap().with_timezone(&Utc);
        assert!(timestamp(&early) < timestamp(&late));
        assert_eq!(timestamp(&early), "2026-03-01T09:00:00.000000Z");
    }
}
