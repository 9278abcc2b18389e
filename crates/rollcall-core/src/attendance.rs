//! Roles, attendance marks and verified caller identity.

use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Role carried by a verified credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Runs sessions for the classes they teach.
    Teacher,
    /// Enrolled in classes; reads their own mark.
    Student,
}

impl Role {
    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Teacher => "teacher",
            Self::Student => "student",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "teacher" => Ok(Self::Teacher),
            "student" => Ok(Self::Student),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A teacher-supplied mark for one student.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    /// Counted as attending.
    Present,
    /// Explicitly or implicitly not attending.
    Absent,
}

impl AttendanceStatus {
    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
        }
    }

    /// Whether this mark counts as attending.
    pub fn is_present(self) -> bool {
        self == Self::Present
    }
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AttendanceStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(Self::Present),
            "absent" => Ok(Self::Absent),
            other => Err(format!("unknown attendance status: {other}")),
        }
    }
}

/// Identity established once at attach time by the identity service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Subject of the credential.
    pub user_id: UserId,
    /// Role the credential grants.
    pub role: Role,
}

impl Identity {
    /// Identity for `user_id` acting as `role`.
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    /// Teacher identity from a raw id.
    pub fn teacher(user_id: impl Into<String>) -> Self {
        Self::new(UserId::from_raw(user_id), Role::Teacher)
    }

    /// Student identity from a raw id.
    pub fn student(user_id: impl Into<String>) -> Self {
        Self::new(UserId::from_raw(user_id), Role::Student)
    }

    /// Whether the caller holds the teacher role.
    pub fn is_teacher(&self) -> bool {
        self.role == Role::Teacher
    }
}
