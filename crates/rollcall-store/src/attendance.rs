//! Persisted attendance records.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use rollcall_core::{
    AttendanceHistory, AttendanceRecord, AttendanceStatus, ClassId, CollaboratorError, PersistenceStore,
    UserId,
};

use crate::database::{blocking, Database};
use crate::error::StoreError;
use crate::row_helpers;

/// One stored attendance row; timestamps are RFC 3339 text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRow {
    /// Class of the closed session.
    pub class_id: ClassId,
    /// Start of the closed session.
    pub session_started_at: String,
    /// Roster member.
    pub student_id: UserId,
    /// Mark written at closure.
    pub status: AttendanceStatus,
    /// Time of the last write to this row.
    pub recorded_at: String,
}

const UPSERT: &str = "INSERT INTO attendance (class_id, session_started_at, student_id, status, recorded_at)
     VALUES (?1, ?2, ?3, ?4, ?5)
     ON CONFLICT(class_id, session_started_at, student_id)
     DO UPDATE SET status = excluded.status, recorded_at = excluded.recorded_at";

/// Attendance records, usable as both `PersistenceStore` and `AttendanceHistory`.
#[derive(Clone)]
pub struct AttendanceRepo {
    db: Database,
}

impl AttendanceRepo {
    /// Repository over a shared database handle.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Write a single record; rewriting the same (class, session, student) replaces it.
    pub fn record(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        let now = row_helpers::timestamp(&Utc::now());
        self.db.with_conn(|conn| upsert(conn, record, &now))
    }

    /// Write all records of one closure atomically.
    #[instrument(skip_all, fields(records = records.len()))]
    pub fn record_all(&self, records: &[AttendanceRecord]) -> Result<(), StoreError> {
        let now = row_helpers::timestamp(&Utc::now());
        self.db.with_tx(|tx| {
            for record in records {
                upsert(tx, record, &now)?;
            }
            Ok(())
        })?;
        debug!("attendance batch committed");
        Ok(())
    }

    /// Most recent persisted record for a student in a class.
    pub fn latest_for(
        &self,
        class_id: &ClassId,
        student_id: &UserId,
    ) -> Result<Option<AttendanceRow>, StoreError> {
        self.db.with_conn(|conn| {
            let raw = conn
                .query_row(
                    "SELECT class_id, session_started_at, student_id, status, recorded_at
                     FROM attendance WHERE class_id = ?1 AND student_id = ?2
                     ORDER BY session_started_at DESC LIMIT 1",
                    [class_id.as_str(), student_id.as_str()],
                    raw_row,
                )
                .optional()?;
            raw.map(into_row).transpose()
        })
    }
}

fn upsert(conn: &Connection, record: &AttendanceRecord, now: &str) -> Result<(), StoreError> {
    let _ = conn.execute(
        UPSERT,
        rusqlite::params![
            record.class_id.as_str(),
            row_helpers::timestamp(&record.session_started_at),
            record.student_id.as_str(),
            record.status.as_str(),
            now,
        ],
    )?;
    Ok(())
}

type RawRow = (String, String, String, String, String);

fn raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_row((class_id, session_started_at, student_id, status, recorded_at): RawRow) -> Result<AttendanceRow, StoreError> {
    Ok(AttendanceRow {
        class_id: ClassId::from_raw(class_id),
        session_started_at,
        student_id: UserId::from_raw(student_id),
        status: row_helpers::parse_enum(&status, "attendance", "status")?,
        recorded_at,
    })
}

#[async_trait]
impl PersistenceStore for AttendanceRepo {
    async fn record_attendance(&self, record: &AttendanceRecord) -> Result<(), CollaboratorError> {
        let repo = self.clone();
        let record = record.clone();
        Ok(blocking(move || repo.record(&record)).await?)
    }

    async fn record_session(&self, records: &[AttendanceRecord]) -> Result<(), CollaboratorError> {
        let repo = self.clone();
        let records = records.to_vec();
        Ok(blocking(move || repo.record_all(&records)).await?)
    }
}

#[async_trait]
impl AttendanceHistory for AttendanceRepo {
    async fn latest_status(
        &self,
        class_id: &ClassId,
        student_id: &UserId,
    ) -> Result<Option<AttendanceStatus>, CollaboratorError> {
        let repo = self.clone();
        let (class_id, student_id) = (class_id.clone(), student_id.clone());
        let row = blocking(move || repo.latest_for(&class_id, &student_id)).await?;
        Ok(row.map(|r| r.status))
    }
}
