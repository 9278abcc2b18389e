//! SQL DDL for the rollcall database.
//! WAL mode + foreign keys enabled at connection time.

/// Version recorded in `schema_version` on first open.
pub const SCHEMA_VERSION: u32 = 1;

/// Connection pragmas, applied before the DDL.
pub const PRAGMAS: &str = r"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
";

/// Idempotent `CREATE TABLE IF NOT EXISTS` for every table and index.
pub const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS classes (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    teacher_id TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS enrollments (
    class_id TEXT NOT NULL REFERENCES classes(id) ON DELETE CASCADE,
    student_id TEXT NOT NULL,
    PRIMARY KEY (class_id, student_id)
);

CREATE TABLE IF NOT EXISTS attendance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    class_id TEXT NOT NULL,
    session_started_at TEXT NOT NULL,
    student_id TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('present', 'absent')),
    recorded_at TEXT NOT NULL,
    UNIQUE (class_id, session_started_at, student_id)
);

CREATE INDEX IF NOT EXISTS idx_classes_teacher ON classes(teacher_id);
CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(class_id, student_id);
";
