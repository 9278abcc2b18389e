//! Identifier newtypes.
//!
//! Ids are shared `Arc<str>` so that fanning one out to every connection
//! or record clones a pointer, not the text.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
        pub struct $name(Arc<str>);

        impl $name {
            /// Fresh time-ordered id, e.g. `class_0190...`.
            pub fn new() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::now_v7()).into())
            }

            /// Wrap an id minted elsewhere, unchanged.
            pub fn from_raw(raw: impl Into<String>) -> Self {
                Self(raw.into().into())
            }

            /// Borrow the id text.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.into()))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                String::deserialize(deserializer).map(Self::from_raw)
            }
        }
    };
}

id_type!(
    /// A teacher or student.
    UserId,
    "user"
);
id_type!(
    /// A class with one teacher and an enrolled roster.
    ClassId,
    "class"
);
id_type!(
    /// One attached socket; a user may hold several.
    ConnectionId,
    "conn"
);
