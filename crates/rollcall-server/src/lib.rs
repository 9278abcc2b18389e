//! # rollcall-server
//!
//! Live attendance sessions over WebSockets.
//!
//! A teacher starts a session over HTTP, then marks students present or absent
//! over a WebSocket connection. Every mark is broadcast to attached clients.
//! `DONE` fills in the roster, persists the session and broadcasts the summary.
//!
//! All session state is owned by a single coordinator task
//! ([`coordinator::Coordinator`]); connections and HTTP handlers talk to it
//! through a [`coordinator::CoordinatorHandle`].

#![deny(unsafe_code)]

pub mod closer;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod health;
pub mod http;
pub mod identity;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod summary;
pub mod telemetry;

#[cfg(test)]
mod test_helpers;

pub use config::{ConfigError, LogFormat, ServerConfig};
pub use coordinator::{Coordinator, CoordinatorHandle};
pub use identity::{JwtIdentity, DEFAULT_TOKEN_TTL};
pub use protocol::{EventKind, OutboundEvent};
pub use server::{start, Collaborators, ServerHandle};
pub use summary::Summary;
