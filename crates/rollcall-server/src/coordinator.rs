//! The session coordinator: one task that owns `SessionState` and processes
//! every inbound event and session start in arrival order.
//!
//! Nothing else can reach the session. A closure in flight is awaited inside
//! the loop, so marks and a second `DONE` sent meanwhile wait in the queue
//! and are handled against the post-closure state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use rollcall_core::{ClassId, ConnectionId, CoordinatorError, Identity, PersistenceStore, RosterStore};

use crate::closer::{SessionCloser, CLASS_NOT_FOUND};
use crate::metrics::{EVENTS_TOTAL, EVENT_ERRORS_TOTAL, SESSIONS_STARTED_TOTAL};
use crate::protocol::{Frame, InboundEvent, OutboundEvent};
use crate::registry::ConnectionRegistry;
use crate::session::{SessionInfo, SessionState};
use crate::summary::Summary;

/// Start attempted by a non-teacher.
pub const TEACHER_ACCESS_REQUIRED: &str = "Forbidden, teacher access required";
/// Start attempted by a teacher of another class.
pub const NOT_CLASS_TEACHER: &str = "Forbidden, not class teacher";

/// Work queued for the coordinator task.
pub enum Command {
    /// A raw text frame from an attached connection.
    Inbound {
        /// Connection the frame arrived on.
        connection_id: ConnectionId,
        /// Identity verified at attach time.
        identity: Identity,
        /// Undecoded frame text.
        raw: String,
    },
    /// An HTTP start request awaiting its reply.
    StartSession {
        /// Class to call the roll for.
        class_id: ClassId,
        /// Authenticated requester.
        caller: Identity,
        /// Receives the started session or the rejection.
        reply: oneshot::Sender<Result<SessionInfo, CoordinatorError>>,
    },
}

/// Cheap, cloneable front door to the coordinator task.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Command>,
    state: watch::Receiver<Option<SessionInfo>>,
}

impl CoordinatorHandle {
    /// Queue a frame; waits while the queue is full. `false` once the
    /// coordinator has stopped.
    pub async fn submit(&self, connection_id: ConnectionId, identity: Identity, raw: String) -> bool {
        self.tx
            .send(Command::Inbound {
                connection_id,
                identity,
                raw,
            })
            .await
            .is_ok()
    }

    /// Ask the coordinator to start a session and wait for the outcome.
    pub async fn start_session(&self, class_id: ClassId, caller: Identity) -> Result<SessionInfo, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::StartSession {
                class_id,
                caller,
                reply,
            })
            .await
            .map_err(|_| CoordinatorError::Internal("coordinator stopped".into()))?;
        rx.await
            .map_err(|_| CoordinatorError::Internal("coordinator dropped the request".into()))?
    }

    /// Last published session snapshot; never waits on the loop.
    pub fn active_session(&self) -> Option<SessionInfo> {
        self.state.borrow().clone()
    }
}

/// Owner of the session state; run with [`Coordinator::spawn`].
pub struct Coordinator {
    session: SessionState,
    registry: Arc<ConnectionRegistry>,
    roster: Arc<dyn RosterStore>,
    closer: SessionCloser,
    state_tx: watch::Sender<Option<SessionInfo>>,
}

impl Coordinator {
    /// Coordinator with no active session.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        roster: Arc<dyn RosterStore>,
        persistence: Arc<dyn PersistenceStore>,
        close_timeout: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(None);
        Self {
            session: SessionState::new(),
            registry,
            closer: SessionCloser::new(roster.clone(), persistence, close_timeout),
            roster,
            state_tx,
        }
    }

    /// Spawn the loop; it runs until `cancel` fires or every handle is dropped.
    pub fn spawn(self, queue: usize, cancel: CancellationToken) -> (CoordinatorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue);
        let handle = CoordinatorHandle {
            tx,
            state: self.state_tx.subscribe(),
        };
        let task = tokio::spawn(self.run(rx, cancel));
        (handle, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>, cancel: CancellationToken) {
        info!("session coordinator started");
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => break,
                },
            }
        }
        if let Some(session) = self.session.current() {
            warn!(
                class_id = %session.class_id,
                marked = session.attendance.len(),
                "coordinator stopping with an unclosed session"
            );
        }
        info!("session coordinator stopped");
    }

    /// Process one command to completion, closure included.
    pub async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Inbound {
                connection_id,
                identity,
                raw,
            } => {
                if let Err(err) = self.dispatch(&connection_id, &identity, &raw).await {
                    self.reject(&connection_id, &identity, &err);
                }
            }
            Command::StartSession { class_id, caller, reply } => {
                let result = self.start_session(class_id, &caller).await;
                let _ = reply.send(result);
            }
        }
    }

    /// Route one frame. Checks run in protocol order: JSON, active session,
    /// event kind, role, payload.
    async fn dispatch(&mut self, connection_id: &ConnectionId, identity: &Identity, raw: &str) -> Result<(), CoordinatorError> {
        let frame = Frame::parse(raw)?;
        if !self.session.is_active() {
            return Err(CoordinatorError::NoActiveSession);
        }
        let kind = frame.kind()?;
        counter!(EVENTS_TOTAL, "event" => kind.as_str()).increment(1);

        let required = kind.required_role();
        if identity.role != required {
            return Err(CoordinatorError::event_only(required));
        }

        debug!(
            connection_id = %connection_id,
            user_id = %identity.user_id,
            event = kind.as_str(),
            "dispatching event"
        );

        match frame.decode(kind)? {
            InboundEvent::AttendanceMarked { student_id, status } => {
                self.session.mark(student_id.clone(), status)?;
                self.publish();
                let _ = self
                    .registry
                    .broadcast(&OutboundEvent::AttendanceMarked { student_id, status });
            }
            InboundEvent::TodaySummary => {
                let summary = self.summary().await?;
                let _ = self.registry.broadcast(&OutboundEvent::TodaySummary(summary));
            }
            InboundEvent::MyAttendance => {
                let status = self.session.status_of(&identity.user_id)?;
                let _ = self
                    .registry
                    .unicast(connection_id, &OutboundEvent::MyAttendance { status: status.into() });
            }
            InboundEvent::Done => self.close().await?,
        }
        Ok(())
    }

    async fn summary(&self) -> Result<Summary, CoordinatorError> {
        let session = self.session.current().ok_or(CoordinatorError::NoActiveSession)?;
        let roster = self
            .roster
            .enrolled_students(&session.class_id)
            .await
            .map_err(|e| CoordinatorError::from_roster(e, CLASS_NOT_FOUND))?;
        Ok(Summary::compute(&roster, &session.attendance))
    }

    /// Persist, then retire the session, then announce. Any failure leaves the
    /// session untouched.
    async fn close(&mut self) -> Result<(), CoordinatorError> {
        let session = self.session.current().ok_or(CoordinatorError::NoActiveSession)?;
        let summary = self.closer.close(session).await?;
        let _ = self.session.clear();
        self.publish();
        let _ = self.registry.broadcast(&OutboundEvent::done(summary));
        Ok(())
    }

    async fn start_session(&mut self, class_id: ClassId, caller: &Identity) -> Result<SessionInfo, CoordinatorError> {
        if !caller.is_teacher() {
            return Err(CoordinatorError::Forbidden(TEACHER_ACCESS_REQUIRED.into()));
        }
        let teacher = self
            .roster
            .class_teacher(&class_id)
            .await
            .map_err(|e| CoordinatorError::from_roster(e, CLASS_NOT_FOUND))?;
        if teacher != caller.user_id {
            return Err(CoordinatorError::Forbidden(NOT_CLASS_TEACHER.into()));
        }

        let _ = self.session.start(class_id.clone(), Utc::now())?;
        self.publish();
        counter!(SESSIONS_STARTED_TOTAL).increment(1);
        info!(class_id = %class_id, user_id = %caller.user_id, "attendance session started");
        self.session
            .info()
            .ok_or_else(|| CoordinatorError::Internal("session vanished after start".into()))
    }

    fn reject(&self, connection_id: &ConnectionId, identity: &Identity, err: &CoordinatorError) {
        counter!(EVENT_ERRORS_TOTAL, "kind" => err.error_kind()).increment(1);
        if err.is_fatal() {
            error!(
                connection_id = %connection_id,
                user_id = %identity.user_id,
                kind = err.error_kind(),
                error = %err,
                "event failed"
            );
        } else {
            warn!(
                connection_id = %connection_id,
                user_id = %identity.user_id,
                role = %identity.role,
                kind = err.error_kind(),
                error = %err,
                "event rejected"
            );
        }
        let _ = self.registry.unicast(connection_id, &OutboundEvent::error(err));
    }

    fn publish(&self) {
        let _ = self.state_tx.send_replace(self.session.info());
    }

    #[cfg(test)]
    pub(crate) fn session(&self) -> &SessionState {
        &self.session
    }
}
