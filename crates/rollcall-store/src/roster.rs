//! Classes and enrollments.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use tracing::{info, instrument};

use rollcall_core::{ClassId, CollaboratorError, RosterStore, UserId};

use crate::database::{blocking, Database};
use crate::error::StoreError;
use crate::row_helpers;

/// One entry of a roster import file.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassImport {
    /// Generated when absent.
    #[serde(default)]
    pub id: Option<ClassId>,
    /// Display name.
    pub name: String,
    /// The class teacher.
    pub teacher_id: UserId,
    /// Students to enroll; existing enrollments are kept.
    #[serde(default)]
    pub student_ids: Vec<UserId>,
}

/// Classes and enrollments, usable as a `RosterStore`.
#[derive(Clone)]
pub struct ClassRepo {
    db: Database,
}

impl ClassRepo {
    /// Repository over a shared database handle.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Enrolled students of a class, sorted by id.
    pub fn students(&self, class_id: &ClassId) -> Result<Vec<UserId>, StoreError> {
        self.db.with_conn(|conn| {
            ensure_class(conn, class_id)?;
            students_of(conn, class_id)
        })
    }

    /// Teacher of a class.
    pub fn teacher(&self, class_id: &ClassId) -> Result<UserId, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT teacher_id FROM classes WHERE id = ?1",
                [class_id.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(UserId::from_raw)
            .ok_or_else(|| StoreError::NotFound(format!("class {class_id}")))
        })
    }

    /// Load classes and enrollments in one transaction.
    ///
    /// Existing classes are updated in place; enrollments are only ever added.
    #[instrument(skip_all, fields(entries = entries.len()))]
    pub fn import(&self, entries: &[ClassImport]) -> Result<Vec<ClassId>, StoreError> {
        let now = Utc::now().to_rfc3339();
        let ids = self.db.with_tx(|tx| {
            let mut ids = Vec::with_capacity(entries.len());
            for entry in entries {
                let id = entry.id.clone().unwrap_or_default();
                let _ = tx.execute(
                    "INSERT INTO classes (id, name, teacher_id, created_at) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET name = excluded.name, teacher_id = excluded.teacher_id",
                    rusqlite::params![id.as_str(), entry.name, entry.teacher_id.as_str(), now],
                )?;
                for student in &entry.student_ids {
                    let _ = tx.execute(
                        "INSERT OR IGNORE INTO enrollments (class_id, student_id) VALUES (?1, ?2)",
                        [id.as_str(), student.as_str()],
                    )?;
                }
                ids.push(id);
            }
            Ok(ids)
        })?;
        info!(classes = ids.len(), "roster imported");
        Ok(ids)
    }

    /// Parse a JSON roster file (`[{id?, name, teacherId, studentIds}]`) and import it.
    pub fn import_file(&self, path: &Path) -> Result<Vec<ClassId>, StoreError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Io(format!("read {}: {e}", path.display())))?;
        let entries: Vec<ClassImport> = serde_json::from_str(&raw)?;
        self.import(&entries)
    }
}

fn ensure_class(conn: &Connection, class_id: &ClassId) -> Result<(), StoreError> {
    let exists = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?1", [class_id.as_str()], |_| Ok(()))
        .optional()?;
    exists.ok_or_else(|| StoreError::NotFound(format!("class {class_id}")))
}

fn students_of(conn: &Connection, class_id: &ClassId) -> Result<Vec<UserId>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT student_id FROM enrollments WHERE class_id = ?1 ORDER BY student_id")?;
    let mut rows = stmt.query([class_id.as_str()])?;
    let mut students = Vec::new();
    while let Some(row) = rows.next()? {
        let raw: String = row_helpers::get(row, 0, "enrollments", "student_id")?;
        students.push(UserId::from_raw(raw));
    }
    Ok(students)
}

#[async_trait]
impl RosterStore for ClassRepo {
    async fn enrolled_students(&self, class_id: &ClassId) -> Result<Vec<UserId>, CollaboratorError> {
        let repo = self.clone();
        let class_id = class_id.clone();
        Ok(blocking(move || repo.students(&class_id)).await?)
    }

    async fn class_teacher(&self, class_id: &ClassId) -> Result<UserId, CollaboratorError> {
        let repo = self.clone();
        let class_id = class_id.clone();
        Ok(blocking(move || repo.teacher(&class_id)).await?)
    }

    async fn is_enrolled(&self, class_id: &ClassId, user_id: &UserId) -> Result<bool, CollaboratorError> {
        let repo = self.clone();
        let class_id = class_id.clone();
        let user_id = user_id.clone();
        let enrolled = blocking(move || {
            repo.db.with_conn(|conn| {
                ensure_class(conn, &class_id)?;
                let hit = conn
                    .query_row(
                        "SELECT 1 FROM enrollments WHERE class_id = ?1 AND student_id = ?2",
                        [class_id.as_str(), user_id.as_str()],
                        |_| Ok(()),
                    )
                    .optional()?;
                Ok(hit.is_some())
            })
        })
        .await?;
        Ok(enrolled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> ClassRepo {
        ClassRepo::new(Database::in_memory().unwrap())
    }

    fn uid(s: &str) -> UserId {
        UserId::from_raw(s)
    }

    fn entries(value: serde_json::Value) -> Vec<ClassImport> {
        serde_json::from_value(value).unwrap()
    }

    /// Repo holding `c1` taught by `t1` with `s1`.
    fn seeded() -> ClassRepo {
        let repo = repo();
        let _ = repo
            .import(&entries(serde_json::json!([
                {"id": "c1", "name": "Algebra", "teacherId": "t1", "studentIds": ["s1"]}
            ])))
            .unwrap();
        repo
    }

    fn class_name(repo: &ClassRepo, class_id: &str) -> String {
        repo.db
            .with_conn(|conn| Ok(conn.query_row("SELECT name FROM classes WHERE id = ?1", [class_id], |row| row.get(0))?))
            .unwrap()
    }

    #[test]
    fn generated_class_ids_are_prefixed() {
        let ids = repo()
            .import(&entries(serde_json::json!([{"name": "Art", "teacherId": "t2"}])))
            .unwrap();
        assert!(ids[0].as_str().starts_with("class_"));
    }

    #[test]
    fn repeated_enrollments_collapse_and_sort() {
        let repo = repo();
        let ids = repo
            .import(&entries(serde_json::json!([
                {"id": "c1", "name": "Algebra", "teacherId": "t1", "studentIds": ["s2", "s1", "s2"]}
            ])))
            .unwrap();
        assert_eq!(repo.students(&ids[0]).unwrap(), vec![uid("s1"), uid("s2")]);
    }

    #[test]
    fn unknown_class_lookups_are_not_found() {
        let repo = repo();
        let missing = ClassId::from_raw("missing");
        assert!(matches!(repo.students(&missing), Err(StoreError::NotFound(_))));
        assert!(matches!(repo.teacher(&missing), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn import_creates_and_updates() {
        let repo = repo();
        let ids = repo
            .import(&entries(serde_json::json!([
                {"id": "c1", "name": "Math", "teacherId": "t1", "studentIds": ["s1", "s2", "s3"]},
                {"name": "Art", "teacherId": "t2"}
            ])))
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], ClassId::from_raw("c1"));
        assert_eq!(repo.students(&ids[0]).unwrap().len(), 3);
        assert!(repo.students(&ids[1]).unwrap().is_empty());

        let _ = repo
            .import(&entries(serde_json::json!([
                {"id": "c1", "name": "Math II", "teacherId": "t9", "studentIds": ["s4"]}
            ])))
            .unwrap();
        assert_eq!(class_name(&repo, "c1"), "Math II");
        assert_eq!(repo.teacher(&ids[0]).unwrap(), uid("t9"));
        assert_eq!(repo.students(&ids[0]).unwrap().len(), 4);
    }

    #[test]
    fn import_file_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.json");
        std::fs::write(
            &path,
            r#"[{"id":"c7","name":"Bio","teacherId":"t1","studentIds":["s1"]}]"#,
        )
        .unwrap();
        let repo = repo();
        let ids = repo.import_file(&path).unwrap();
        assert_eq!(ids, vec![ClassId::from_raw("c7")]);
        assert_eq!(class_name(&repo, "c7"), "Bio");
    }

    #[test]
    fn import_file_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = repo().import_file(&path).unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[tokio::test]
    async fn roster_store_contract() {
        let repo = seeded();
        let c1 = ClassId::from_raw("c1");

        assert_eq!(repo.enrolled_students(&c1).await.unwrap(), vec![uid("s1")]);
        assert_eq!(repo.class_teacher(&c1).await.unwrap(), uid("t1"));
        assert!(repo.is_enrolled(&c1, &uid("s1")).await.unwrap());
        assert!(!repo.is_enrolled(&c1, &uid("s2")).await.unwrap());

        let err = repo
            .enrolled_students(&ClassId::from_raw("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::NotFound(_)));
    }
}
