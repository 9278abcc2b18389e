//! Turns a live session into durable attendance records.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tracing::{error, info, instrument};

use rollcall_core::{AttendanceRecord, AttendanceStatus, CoordinatorError, PersistenceStore, RosterStore, UserId};

use crate::metrics::{SESSIONS_CLOSED_TOTAL, SESSION_CLOSE_DURATION_SECONDS, SESSION_CLOSE_FAILURES_TOTAL};
use crate::session::Session;
use crate::summary::Summary;

/// Reply text when the session's class no longer resolves.
pub const CLASS_NOT_FOUND: &str = "Class not found";

/// Fills the roster gaps, persists and summarizes a closing session.
pub struct SessionCloser {
    roster: Arc<dyn RosterStore>,
    persistence: Arc<dyn PersistenceStore>,
    timeout: Duration,
}

impl SessionCloser {
    /// `timeout` bounds each persistence attempt.
    pub fn new(roster: Arc<dyn RosterStore>, persistence: Arc<dyn PersistenceStore>, timeout: Duration) -> Self {
        Self {
            roster,
            persistence,
            timeout,
        }
    }

    /// Persist one record per roster student and return the final summary.
    ///
    /// Never touches the session itself: on any error the caller keeps it
    /// active so the teacher can retry.
    #[instrument(skip_all, fields(class_id = %session.class_id))]
    pub async fn close(&self, session: &Session) -> Result<Summary, CoordinatorError> {
        let roster = self
            .roster
            .enrolled_students(&session.class_id)
            .await
            .map_err(|e| CoordinatorError::from_roster(e, CLASS_NOT_FOUND))?;

        let records = final_records(session, &roster);
        let summary = Summary::compute(&roster, &session.attendance);

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, self.persistence.record_session(&records)).await;
        histogram!(SESSION_CLOSE_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("persistence timed out after {:?}", self.timeout)),
        };
        if let Some(detail) = failure {
            counter!(SESSION_CLOSE_FAILURES_TOTAL).increment(1);
            error!(records = records.len(), error = %detail, "attendance closure failed, session kept active");
            return Err(CoordinatorError::PersistenceFailure(detail));
        }

        counter!(SESSIONS_CLOSED_TOTAL).increment(1);
        info!(
            present = summary.present,
            absent = summary.absent,
            total = summary.total,
            "attendance persisted"
        );
        Ok(summary)
    }
}

/// One record per roster student; present only if last marked present.
pub fn final_records(session: &Session, roster: &[UserId]) -> Vec<AttendanceRecord> {
    roster
        .iter()
        .map(|student_id| {
            let status = match session.attendance.get(student_id) {
                Some(AttendanceStatus::Present) => AttendanceStatus::Present,
                _ => AttendanceStatus::Absent,
            };
            AttendanceRecord {
                class_id: session.class_id.clone(),
                session_started_at: session.started_at,
                student_id: student_id.clone(),
                status,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use chrono::Utc;
    use rollcall_core::ClassId;

    use crate::test_helpers::{FakePersistence, FakeRoster, PersistMode};

    fn session() -> Session {
        Session {
            class_id: ClassId::from_raw("c1"),
            started_at: Utc::now(),
            attendance: HashMap::from([
                (UserId::from_raw("s1"), AttendanceStatus::Present),
                (UserId::from_raw("s2"), AttendanceStatus::Absent),
                (UserId::from_raw("outsider"), AttendanceStatus::Present),
            ]),
        }
    }

    fn closer(persistence: Arc<FakePersistence>, timeout: Duration) -> SessionCloser {
        SessionCloser::new(Arc::new(FakeRoster::scenario()), persistence, timeout)
    }

    #[test]
    fn final_records_cover_roster_only() {
        let roster = FakeRoster::scenario_students();
        let records = final_records(&session(), &roster);
        let statuses: Vec<_> = records
            .iter()
            .map(|r| (r.student_id.as_str().to_string(), r.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("s1".to_string(), AttendanceStatus::Present),
                ("s2".to_string(), AttendanceStatus::Absent),
                ("s3".to_string(), AttendanceStatus::Absent),
            ]
        );
    }

    #[tokio::test]
    async fn close_persists_and_summarizes() {
        let persistence = Arc::new(FakePersistence::default());
        let summary = closer(persistence.clone(), Duration::from_secs(5))
            .close(&session())
            .await
            .unwrap();
        assert_eq!(summary, Summary { present: 1, absent: 2, total: 3 });
        assert_eq!(persistence.records().len(), 3);
    }

    #[tokio::test]
    async fn unknown_class_is_not_found() {
        let persistence = Arc::new(FakePersistence::default());
        let mut orphan = session();
        orphan.class_id = ClassId::from_raw("gone");
        let err = closer(persistence.clone(), Duration::from_secs(5))
            .close(&orphan)
            .await
            .unwrap_err();
        assert_eq!(err, CoordinatorError::NotFound(CLASS_NOT_FOUND.into()));
        assert!(persistence.records().is_empty());
    }

    #[tokio::test]
    async fn backend_failure_is_persistence_failure() {
        let persistence = Arc::new(FakePersistence::with_mode(PersistMode::Fail));
        let err = closer(persistence, Duration::from_secs(5))
            .close(&session())
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::PersistenceFailure(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_store_times_out() {
        let persistence = Arc::new(FakePersistence::with_mode(PersistMode::Stall));
        let err = closer(persistence, Duration::from_secs(30))
            .close(&session())
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::PersistenceFailure(msg) if msg.contains("timed out")));
    }
}
