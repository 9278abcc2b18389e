//! REST endpoints and the JSON error envelope.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use rollcall_core::{AttendanceStatus, ClassId, CoordinatorError, Identity, Role};

use crate::closer::CLASS_NOT_FOUND;
use crate::connection;
use crate::coordinator::TEACHER_ACCESS_REQUIRED;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_ATTACH_REJECTED_TOTAL;
use crate::server::AppState;

/// Body failed to deserialize.
pub const INVALID_REQUEST_SCHEMA: &str = "Invalid request schema";
/// Missing or unverifiable bearer token.
pub const UNAUTHORIZED: &str = "Unauthorized, token missing or invalid";
/// Student endpoint called with another role.
pub const STUDENT_ACCESS_REQUIRED: &str = "Forbidden, student access required";

/// Error body: `{ "success": false, "error": "<message>" }`.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status of the response.
    pub status: StatusCode,
    /// Client-safe error text.
    pub message: String,
}

impl ApiError {
    /// Error with `status` and `message`.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        let status = match &err {
            CoordinatorError::InvalidJson | CoordinatorError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            CoordinatorError::Unauthorized => StatusCode::UNAUTHORIZED,
            CoordinatorError::Forbidden(_) => StatusCode::FORBIDDEN,
            CoordinatorError::NotFound(_) => StatusCode::NOT_FOUND,
            CoordinatorError::Conflict(_) => StatusCode::CONFLICT,
            CoordinatorError::NoActiveSession
            | CoordinatorError::InvalidOperation
            | CoordinatorError::PersistenceFailure(_)
            | CoordinatorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(kind = err.error_kind(), error = %err, "request failed");
        }
        Self::new(status, err.client_message())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        warn!(error = %rejection.body_text(), "malformed request body");
        Self::new(StatusCode::BAD_REQUEST, INVALID_REQUEST_SCHEMA)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "success": false, "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

/// Success body: `{ "success": true, "data": ... }`.
#[derive(Debug, Serialize)]
pub struct ApiSuccess<T> {
    /// Always `true`.
    pub success: bool,
    /// Endpoint payload.
    pub data: T,
}

impl<T: Serialize> ApiSuccess<T> {
    /// Wrap `data` in a success body.
    pub fn new(data: T) -> Json<Self> {
        Json(Self { success: true, data })
    }
}

/// Credential from `Authorization`, with or without a `Bearer ` prefix.
pub fn bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim_start();
    let token = value.strip_prefix("Bearer").unwrap_or(value).trim();
    (!token.is_empty()).then_some(token)
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Identity, ApiError> {
    bearer(headers)
        .and_then(|token| state.identity.verify(token).ok())
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, UNAUTHORIZED))
}

/// POST /attendance/start body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    /// Class to start a session for.
    pub class_id: ClassId,
}

/// Data of a successful start.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedSession {
    /// Class the session runs for.
    pub class_id: ClassId,
    /// Session start time.
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// POST /attendance/start
pub async fn start_attendance(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<StartRequest>, JsonRejection>,
) -> Result<Json<ApiSuccess<StartedSession>>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    if !caller.is_teacher() {
        return Err(ApiError::new(StatusCode::FORBIDDEN, TEACHER_ACCESS_REQUIRED));
    }
    let Json(request) = body?;
    let info = state.coordinator.start_session(request.class_id, caller).await?;
    Ok(ApiSuccess::new(StartedSession {
        class_id: info.class_id,
        started_at: info.started_at,
    }))
}

/// Data of GET /class/{id}/my-attendance.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyAttendanceResponse {
    /// Requested class.
    pub class_id: ClassId,
    /// Mark from the latest persisted session, `null` if none.
    pub status: Option<AttendanceStatus>,
}

/// GET /class/{id}/my-attendance
pub async fn my_attendance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(class_id): Path<ClassId>,
) -> Result<Json<ApiSuccess<MyAttendanceResponse>>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    if caller.role != Role::Student {
        return Err(ApiError::new(StatusCode::FORBIDDEN, STUDENT_ACCESS_REQUIRED));
    }
    let enrolled = state
        .roster
        .is_enrolled(&class_id, &caller.user_id)
        .await
        .map_err(|e| CoordinatorError::from_roster(e, CLASS_NOT_FOUND))?;
    if !enrolled {
        return Err(ApiError::new(StatusCode::FORBIDDEN, "Forbidden"));
    }
    let status = state
        .history
        .latest_status(&class_id, &caller.user_id)
        .await
        .map_err(|e| CoordinatorError::Internal(e.to_string()))?;
    Ok(ApiSuccess::new(MyAttendanceResponse { class_id, status }))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.count(),
        state.coordinator.active_session(),
    ))
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Query string of the `/ws` upgrade.
#[derive(Debug, Deserialize)]
pub struct AttachParams {
    /// Bearer token for clients that cannot set headers.
    pub token: Option<String>,
}

/// GET /ws
///
/// The upgrade always completes; a bad credential gets an `ERROR` frame and
/// a close instead of an HTTP error, so browser clients can read the reason.
pub async fn attach(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<AttachParams>,
    headers: HeaderMap,
) -> Response {
    let verified = params
        .token
        .as_deref()
        .or_else(|| bearer(&headers))
        .ok_or(CoordinatorError::Unauthorized)
        .and_then(|token| state.identity.verify(token));

    match verified {
        Ok(identity) => {
            let registry = state.registry.clone();
            let coordinator = state.coordinator.clone();
            let heartbeat = state.heartbeat_interval;
            ws.on_upgrade(move |socket| {
                connection::run_connection(socket, identity, registry, coordinator, heartbeat)
            })
        }
        Err(err) => {
            counter!(WS_ATTACH_REJECTED_TOTAL).increment(1);
            warn!(error = %err, "websocket attach rejected");
            ws.on_upgrade(move |socket| connection::reject(socket, err))
        }
    }
}
