//! # rollcall-core
//!
//! Shared vocabulary for the roll-call coordinator.
//!
//! - Branded identifiers (`UserId`, `ClassId`, `ConnectionId`)
//! - Domain enums (`Role`, `AttendanceStatus`) and the verified `Identity`
//! - The coordinator error taxonomy
//! - Collaborator traits implemented outside the core (identity, roster, persistence, history)

#![deny(unsafe_code)]

pub mod attendance;
pub mod collaborators;
pub mod errors;
pub mod ids;

pub use attendance::{AttendanceStatus, Identity, Role};
pub use collaborators::{
    AttendanceHistory, AttendanceRecord, IdentityService, PersistenceStore, RosterStore,
};
pub use errors::{CollaboratorError, CoordinatorError};
pub use ids::{ClassId, ConnectionId, UserId};
