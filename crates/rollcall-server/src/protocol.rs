//! Wire protocol: `{ "event": <KIND>, "data": {...} }` in both directions.
//!
//! Inbound frames are decoded in stages so the coordinator can apply its
//! checks in protocol order: well-formed JSON, then session, then kind and
//! role, then payload shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use rollcall_core::{AttendanceStatus, CoordinatorError, Role, UserId};

use crate::summary::Summary;

/// `DONE` broadcast message.
pub const ATTENDANCE_PERSISTED: &str = "Attendance persisted";

/// Event kinds a client may send.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Teacher marks one student.
    AttendanceMarked,
    /// Teacher asks for running counts.
    TodaySummary,
    /// Student asks for their own mark.
    MyAttendance,
    /// Teacher closes the session.
    Done,
}

impl EventKind {
    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AttendanceMarked => "ATTENDANCE_MARKED",
            Self::TodaySummary => "TODAY_SUMMARY",
            Self::MyAttendance => "MY_ATTENDANCE",
            Self::Done => "DONE",
        }
    }

    /// Role allowed to send this kind.
    pub fn required_role(self) -> Role {
        match self {
            Self::MyAttendance => Role::Student,
            Self::AttendanceMarked | Self::TodaySummary | Self::Done => Role::Teacher,
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = CoordinatorError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ATTENDANCE_MARKED" => Ok(Self::AttendanceMarked),
            "TODAY_SUMMARY" => Ok(Self::TodaySummary),
            "MY_ATTENDANCE" => Ok(Self::MyAttendance),
            "DONE" => Ok(Self::Done),
            _ => Err(CoordinatorError::InvalidOperation),
        }
    }
}

/// A decoded, typed inbound event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundEvent {
    /// Mark `student_id` with `status`.
    AttendanceMarked {
        /// Student being marked.
        student_id: UserId,
        /// Mark to record.
        status: AttendanceStatus,
    },
    /// Broadcast the running summary.
    TodaySummary,
    /// Reply with the caller's mark.
    MyAttendance,
    /// Close and persist.
    Done,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkPayload {
    student_id: UserId,
    status: AttendanceStatus,
}

/// A well-formed JSON frame whose kind has not been checked yet.
#[derive(Debug)]
pub struct Frame {
    value: Value,
}

impl Frame {
    /// Parse raw text; malformed JSON is `InvalidJson`.
    pub fn parse(raw: &str) -> Result<Self, CoordinatorError> {
        serde_json::from_str(raw)
            .map(|value| Self { value })
            .map_err(|_| CoordinatorError::InvalidJson)
    }

    /// Unknown or missing `event` is `InvalidOperation`.
    pub fn kind(&self) -> Result<EventKind, CoordinatorError> {
        self.value
            .get("event")
            .and_then(Value::as_str)
            .ok_or(CoordinatorError::InvalidOperation)?
            .parse()
    }

    /// Decode the payload for `kind`. A bad payload is `InvalidInput`.
    pub fn decode(mut self, kind: EventKind) -> Result<InboundEvent, CoordinatorError> {
        match kind {
            EventKind::AttendanceMarked => {
                let data = self.value.get_mut("data").map(Value::take).unwrap_or(Value::Null);
                let payload: MarkPayload = serde_json::from_value(data).map_err(|_| {
                    CoordinatorError::InvalidInput(
                        "Invalid ATTENDANCE_MARKED payload, expected {studentId, status}".into(),
                    )
                })?;
                Ok(InboundEvent::AttendanceMarked {
                    student_id: payload.student_id,
                    status: payload.status,
                })
            }
            EventKind::TodaySummary => Ok(InboundEvent::TodaySummary),
            EventKind::MyAttendance => Ok(InboundEvent::MyAttendance),
            EventKind::Done => Ok(InboundEvent::Done),
        }
    }
}

/// A student's own status inside the active session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MyStatus {
    /// Marked present.
    Present,
    /// Marked absent.
    Absent,
    /// No mark yet in this session.
    #[serde(rename = "not yet updated")]
    NotYetUpdated,
}

impl From<Option<AttendanceStatus>> for MyStatus {
    fn from(status: Option<AttendanceStatus>) -> Self {
        match status {
            Some(AttendanceStatus::Present) => Self::Present,
            Some(AttendanceStatus::Absent) => Self::Absent,
            None => Self::NotYetUpdated,
        }
    }
}

/// Messages the server sends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundEvent {
    /// First message on an accepted connection.
    Connected {
        /// Verified caller.
        #[serde(rename = "userId")]
        user_id: UserId,
        /// Verified role.
        role: Role,
    },
    /// A mark was recorded.
    AttendanceMarked {
        /// Student that was marked.
        #[serde(rename = "studentId")]
        student_id: UserId,
        /// Recorded mark.
        status: AttendanceStatus,
    },
    /// Running counts over the roster.
    TodaySummary(Summary),
    /// Unicast reply to a student.
    MyAttendance {
        /// The caller's mark in the active session.
        status: MyStatus,
    },
    /// Session persisted and closed.
    Done {
        /// Always `Attendance persisted`.
        message: String,
        /// Students marked present.
        present: usize,
        /// Everyone else on the roster.
        absent: usize,
        /// Roster size.
        total: usize,
    },
    /// Unicast rejection of the caller's last frame.
    Error {
        /// Client-safe description.
        message: String,
    },
}

impl OutboundEvent {
    /// `DONE` broadcast carrying the final summary.
    pub fn done(summary: Summary) -> Self {
        Self::Done {
            message: ATTENDANCE_PERSISTED.into(),
            present: summary.present,
            absent: summary.absent,
            total: summary.total,
        }
    }

    /// `ERROR` reply with the client-safe message.
    pub fn error(err: &CoordinatorError) -> Self {
        Self::Error {
            message: err.client_message(),
        }
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "CONNECTED",
            Self::AttendanceMarked { .. } => "ATTENDANCE_MARKED",
            Self::TodaySummary(_) => "TODAY_SUMMARY",
            Self::MyAttendance { .. } => "MY_ATTENDANCE",
            Self::Done { .. } => "DONE",
            Self::Error { .. } => "ERROR",
        }
    }
}
