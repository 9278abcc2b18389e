//! # rollcall-store
//!
//! SQLite-backed roster and attendance storage. `ClassRepo` implements the
//! coordinator's `RosterStore`, `AttendanceRepo` its `PersistenceStore`.

#![deny(unsafe_code)]

pub mod attendance;
pub mod database;
pub mod error;
pub mod roster;
pub mod row_helpers;
pub mod schema;

pub use attendance::{AttendanceRepo, AttendanceRow};
pub use database::Database;
pub use error::StoreError;
pub use roster::{ClassImport, ClassRepo};
