//! The single active roll-call.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rollcall_core::{AttendanceStatus, ClassId, CoordinatorError, UserId};

/// Conflict text when a session is already running.
pub const SESSION_ALREADY_ACTIVE: &str = "Attendance session already active";

/// The roll-call in progress.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    /// Class whose roster is being called.
    pub class_id: ClassId,
    /// Start time; part of the persisted record key.
    pub started_at: DateTime<Utc>,
    /// Last mark per student; a missing key means "not yet marked".
    pub attendance: HashMap<UserId, AttendanceStatus>,
}

/// Read-only projection published to the HTTP side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Class of the active session.
    pub class_id: ClassId,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// Distinct students marked so far.
    pub marked: usize,
}

/// Holder for at most one session. Owned by the coordinator loop and never
/// shared.
#[derive(Debug, Default)]
pub struct SessionState {
    active: Option<Session>,
}

impl SessionState {
    /// Empty holder, no session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a session for `class_id`.
    ///
    /// Fails with `Conflict` while another session is active.
    pub fn start(&mut self, class_id: ClassId, started_at: DateTime<Utc>) -> Result<&Session, CoordinatorError> {
        if self.active.is_some() {
            return Err(CoordinatorError::Conflict(SESSION_ALREADY_ACTIVE.into()));
        }
        Ok(&*self.active.insert(Session {
            class_id,
            started_at,
            attendance: HashMap::new(),
        }))
    }

    /// Record a mark, replacing any earlier one for the same student.
    pub fn mark(&mut self, student_id: UserId, status: AttendanceStatus) -> Result<(), CoordinatorError> {
        let session = self.active.as_mut().ok_or(CoordinatorError::NoActiveSession)?;
        let _ = session.attendance.insert(student_id, status);
        Ok(())
    }

    /// `None` when the student has not been marked yet.
    pub fn status_of(&self, student_id: &UserId) -> Result<Option<AttendanceStatus>, CoordinatorError> {
        let session = self.active.as_ref().ok_or(CoordinatorError::NoActiveSession)?;
        Ok(session.attendance.get(student_id).copied())
    }

    /// End the session, handing back its final state.
    pub fn clear(&mut self) -> Option<Session> {
        self.active.take()
    }

    /// Whether a session is running.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// The running session, if any.
    pub fn current(&self) -> Option<&Session> {
        self.active.as_ref()
    }

    /// Snapshot for health and HTTP replies.
    pub fn info(&self) -> Option<SessionInfo> {
        self.active.as_ref().map(|s| SessionInfo {
            class_id: s.class_id.clone(),
            started_at: s.started_at,
            marked: s.attendance.len(),
        })
    }
}
