//! In-memory collaborators with failure injection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use rollcall_core::{
    AttendanceHistory, AttendanceRecord, AttendanceStatus, ClassId, CollaboratorError, PersistenceStore,
    RosterStore, UserId,
};

use crate::identity::JwtIdentity;

pub const TEST_SECRET: &str = "test-secret";

pub fn identity() -> Arc<JwtIdentity> {
    Arc::new(JwtIdentity::new(TEST_SECRET))
}

#[derive(Default)]
pub struct FakeRoster {
    classes: HashMap<ClassId, (UserId, Vec<UserId>)>,
    broken: bool,
}

impl FakeRoster {
    /// Class `c1` taught by `t1` with students `s1`, `s2`, `s3`.
    pub fn scenario() -> Self {
        Self::default().with_class("c1", "t1", &["s1", "s2", "s3"])
    }

    pub fn scenario_students() -> Vec<UserId> {
        ["s1", "s2", "s3"].into_iter().map(UserId::from_raw).collect()
    }

    pub fn with_class(mut self, class: &str, teacher: &str, students: &[&str]) -> Self {
        let _ = self.classes.insert(
            ClassId::from_raw(class),
            (
                UserId::from_raw(teacher),
                students.iter().map(|s| UserId::from_raw(*s)).collect(),
            ),
        );
        self
    }

    /// Every lookup fails with a backend error.
    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }

    fn lookup(&self, class_id: &ClassId) -> Result<&(UserId, Vec<UserId>), CollaboratorError> {
        if self.broken {
            return Err(CollaboratorError::Backend("roster offline".into()));
        }
        self.classes
            .get(class_id)
            .ok_or_else(|| CollaboratorError::NotFound(format!("class {class_id}")))
    }
}

#[async_trait]
impl RosterStore for FakeRoster {
    async fn enrolled_students(&self, class_id: &ClassId) -> Result<Vec<UserId>, CollaboratorError> {
        Ok(self.lookup(class_id)?.1.clone())
    }

    async fn class_teacher(&self, class_id: &ClassId) -> Result<UserId, CollaboratorError> {
        Ok(self.lookup(class_id)?.0.clone())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PersistMode {
    #[default]
    Ok,
    Fail,
    /// Never completes.
    Stall,
}

#[derive(Default)]
pub struct FakePersistence {
    mode: Mutex<PersistMode>,
    records: Mutex<Vec<AttendanceRecord>>,
    attempts: AtomicUsize,
}

impl FakePersistence {
    pub fn with_mode(mode: PersistMode) -> Self {
        let fake = Self::default();
        fake.set_mode(mode);
        fake
    }

    pub fn set_mode(&self, mode: PersistMode) {
        *self.mode.lock() = mode;
    }

    pub fn records(&self) -> Vec<AttendanceRecord> {
        self.records.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistenceStore for FakePersistence {
    async fn record_attendance(&self, record: &AttendanceRecord) -> Result<(), CollaboratorError> {
        self.record_session(std::slice::from_ref(record)).await
    }

    async fn record_session(&self, records: &[AttendanceRecord]) -> Result<(), CollaboratorError> {
        let _ = self.attempts.fetch_add(1, Ordering::SeqCst);
        let mode = *self.mode.lock();
        match mode {
            PersistMode::Ok => {
                self.records.lock().extend_from_slice(records);
                Ok(())
            }
            PersistMode::Fail => Err(CollaboratorError::Backend("disk full".into())),
            PersistMode::Stall => std::future::pending().await,
        }
    }
}

#[async_trait]
impl AttendanceHistory for FakePersistence {
    async fn latest_status(
        &self,
        class_id: &ClassId,
        student_id: &UserId,
    ) -> Result<Option<AttendanceStatus>, CollaboratorError> {
        Ok(self
            .records
            .lock()
            .iter()
            .rev()
            .find(|r| &r.class_id == class_id && &r.student_id == student_id)
            .map(|r| r.status))
    }
}
