//! Error types shared by the coordinator and its collaborators.

use crate::attendance::Role;

/// Failure reported by an external collaborator (roster or persistence backend).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    /// The collaborator has no such class or record.
    #[error("not found: {0}")]
    NotFound(String),
    /// Storage or transport failure.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Error taxonomy of the session coordinator.
///
/// Everything except `PersistenceFailure` and `Internal` is recovered locally
/// with an `ERROR` reply; those two are surfaced to the operator as well.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    /// Inbound frame was not well-formed JSON.
    #[error("Invalid JSON format")]
    InvalidJson,

    /// Well-formed frame with a missing or ill-typed field.
    #[error("{0}")]
    InvalidInput(String),

    /// Credential missing or failed verification.
    #[error("Unauthorized or invalid token")]
    Unauthorized,

    /// Caller holds the wrong role for the requested operation.
    #[error("{0}")]
    Forbidden(String),

    /// Session event sent while no session is running.
    #[error("No active attendance session")]
    NoActiveSession,

    /// Request clashes with current state, e.g. a second session.
    #[error("{0}")]
    Conflict(String),

    /// Referenced class does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Event kind outside the protocol.
    #[error("Invalid operation")]
    InvalidOperation,

    /// A durable write failed or timed out during closure.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    /// Collaborator backend failed outside of persistence.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    /// `Forbidden` reply for an event reserved to `role`.
    pub fn event_only(role: Role) -> Self {
        Self::Forbidden(format!("Forbidden, {role} event only"))
    }

    /// Text placed in the `message` of an `ERROR` reply.
    ///
    /// Backend details are logged, never sent to clients.
    pub fn client_message(&self) -> String {
        match self {
            Self::PersistenceFailure(_) => {
                "Attendance could not be persisted, session is still active".to_string()
            }
            Self::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidJson => "invalid_json",
            Self::InvalidInput(_) => "invalid_input",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NoActiveSession => "no_active_session",
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
            Self::InvalidOperation => "invalid_operation",
            Self::PersistenceFailure(_) => "persistence_failure",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether the condition must be escalated beyond the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PersistenceFailure(_) | Self::Internal(_))
    }

    /// Map a roster lookup failure, naming the missing resource.
    pub fn from_roster(err: CollaboratorError, missing: &str) -> Self {
        match err {
            CollaboratorError::NotFound(_) => Self::NotFound(missing.to_string()),
            CollaboratorError::Backend(detail) => Self::Internal(detail),
        }
    }
}
