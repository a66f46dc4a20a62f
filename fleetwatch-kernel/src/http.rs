/**
 * HTTP API - read side of the fleet store for dashboard collaborators.
 *
 * ROUTES:
 * - GET  /health, /system/health
 * - GET  /state                      published store state, as-is
 * - GET  /devices, /devices/{id}     device projection, recomputed per request
 * - GET  /audit                      audit projection (limit/offset/action/user)
 * - POST /refresh                    re-attach the live subscription
 * - PUT  /devices/{id}/nickname
 * - PUT|DELETE /devices/{id}/jobs/{job_id}
 *
 * Every mutation carries the acting user in its body (or `?user=` for DELETE)
 * so it can be written to the audit trail.
 */

use crate::commands::{CommandError, FleetCommands};
use crate::health::{HealthTracker, KernelHealth};
use crate::models::{AuditEntry, DeviceView, FleetState};
use crate::projections::{devices, project_device, query_audit_log, AuditQuery};
use crate::state::now_secs;
use crate::store::FleetStore;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Clone)]
pub struct AppState {
    pub store: FleetStore,
    pub commands: FleetCommands,
    pub health_tracker: HealthTracker,
}

#[derive(Debug, Deserialize)]
pub struct RefreshBody {
    pub user: String,
}

#[derive(Debug, Deserialize)]
pub struct NicknameBody {
    pub user: String,
    pub nickname: String,
}

#[derive(Debug, Deserialize)]
pub struct JobBody {
    pub user: String,
    pub job: Value,
}

#[derive(Debug, Deserialize)]
pub struct UserParam {
    pub user: String,
}

type CommandReply = (StatusCode, Json<Value>);

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/state", get(get_state))
        .route("/devices", get(get_devices))
        .route("/devices/{id}", get(get_device))
        .route("/devices/{id}/nickname", put(put_nickname))
        .route("/devices/{id}/jobs/{job_id}", put(put_job).delete(delete_job))
        .route("/audit", get(get_audit))
        .route("/refresh", post(post_refresh))
        .with_state(app_state)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health_tracker.get_health(&app.store.snapshot(), now_secs()))
}

// GET /state
async fn get_state(State(app): State<AppState>) -> Json<FleetState> {
    Json(app.store.snapshot())
}

// GET /devices
async fn get_devices(State(app): State<AppState>) -> Json<Vec<DeviceView>> {
    Json(devices(&app.store.snapshot()))
}

// GET /devices/{id}
async fn get_device(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeviceView>, StatusCode> {
    let state = app.store.snapshot();
    if !state.systems.contains_key(&id) {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(project_device(&state, &id, now_secs())))
}

// GET /audit
async fn get_audit(
    State(app): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Json<Vec<AuditEntry>> {
    Json(query_audit_log(&app.store.snapshot(), &query))
}

// POST /refresh
async fn post_refresh(State(app): State<AppState>, Json(body): Json<RefreshBody>) -> CommandReply {
    // The re-subscription completes in the background; clients watch `loading`.
    let _pending = app.commands.request_refresh(&body.user);
    (StatusCode::ACCEPTED, Json(json!({ "ok": true, "loading": true })))
}

// PUT /devices/{id}/nickname
async fn put_nickname(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<NicknameBody>,
) -> CommandReply {
    reply(app.commands.set_nickname(&body.user, &id, &body.nickname))
}

// PUT /devices/{id}/jobs/{job_id}
async fn put_job(
    State(app): State<AppState>,
    Path((id, job_id)): Path<(String, String)>,
    Json(body): Json<JobBody>,
) -> CommandReply {
    reply(app.commands.upsert_job(&body.user, &id, &job_id, body.job))
}

// DELETE /devices/{id}/jobs/{job_id}?user=
async fn delete_job(
    State(app): State<AppState>,
    Path((id, job_id)): Path<(String, String)>,
    Query(params): Query<UserParam>,
) -> CommandReply {
    reply(app.commands.remove_job(&params.user, &id, &job_id))
}

fn reply(result: Result<(), CommandError>) -> CommandReply {
    match result {
        Ok(()) => (StatusCode::OK, Json(json!({ "ok": true }))),
        Err(e) => {
            let code = match e {
                CommandError::UnknownDevice(_) => StatusCode::NOT_FOUND,
                CommandError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                CommandError::Gateway(_) => StatusCode::BAD_GATEWAY,
            };
            (code, Json(json!({ "ok": false, "msg": e.to_string() })))
        }
    }
}
