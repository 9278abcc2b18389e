//! Interfaces to the systems the coordinator depends on but does not own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attendance::{AttendanceStatus, Identity};
use crate::errors::{CollaboratorError, CoordinatorError};
use crate::ids::{ClassId, UserId};

/// Verifies a bearer credential into a caller identity.
pub trait IdentityService: Send + Sync {
    /// Fails with `CoordinatorError::Unauthorized` when the credential does not verify.
    fn verify(&self, credential: &str) -> Result<Identity, CoordinatorError>;
}

/// Resolves classes to their teacher and enrolled students.
#[async_trait]
pub trait RosterStore: Send + Sync {
    /// Enrolled student ids for `class_id`; `NotFound` if the class is unknown.
    async fn enrolled_students(&self, class_id: &ClassId) -> Result<Vec<UserId>, CollaboratorError>;

    /// Teacher of `class_id`; `NotFound` if the class is unknown.
    async fn class_teacher(&self, class_id: &ClassId) -> Result<UserId, CollaboratorError>;

    /// Whether `user_id` is on the roster of `class_id`.
    async fn is_enrolled(&self, class_id: &ClassId, user_id: &UserId) -> Result<bool, CollaboratorError> {
        Ok(self.enrolled_students(class_id).await?.contains(user_id))
    }
}

/// One durable attendance row produced by a session closure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    /// Class the session ran for.
    pub class_id: ClassId,
    /// Start time of the session that produced this record; part of the idempotency key.
    pub session_started_at: DateTime<Utc>,
    /// Roster member this row is about.
    pub student_id: UserId,
    /// Final mark; unmarked students are `Absent`.
    pub status: AttendanceStatus,
}

/// Durable sink for closure results.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Persist one record, replacing any row with the same key.
    async fn record_attendance(&self, record: &AttendanceRecord) -> Result<(), CollaboratorError>;

    /// Persist every record of one closure.
    ///
    /// The default writes records one by one and may leave a partial write
    /// behind on failure; backends that can should override this with an
    /// atomic, idempotent implementation.
    async fn record_session(&self, records: &[AttendanceRecord]) -> Result<(), CollaboratorError> {
        for record in records {
            self.record_attendance(record).await?;
        }
        Ok(())
    }
}

/// Read side of persisted attendance, for students checking past sessions.
#[async_trait]
pub trait AttendanceHistory: Send + Sync {
    /// Status recorded by the most recent closed session of `class_id`, if any.
    async fn latest_status(
        &self,
        class_id: &ClassId,
        student_id: &UserId,
    ) -> Result<Option<AttendanceStatus>, CollaboratorError>;
}
