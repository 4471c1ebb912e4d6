//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks DB connectivity, the upload root
//!   and reports the offload scheduler state

use crate::{services::scheduler_service::SchedulerState, state::AppState};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::HashMap, path::Path};
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Very small liveness probe. Always returns 200 OK and never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Runs a lightweight query against SQLite (`SELECT 1`).
/// 2. Writes, reads back and deletes a dot file under the upload root.
///
/// HTTP 200 when both checks pass, HTTP 503 otherwise. The scheduler state
/// is informational and never fails the probe.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let sqlite_check = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*state.applications.db)
        .await
    {
        Ok(1) => CheckStatus::ok(),
        Ok(v) => CheckStatus::failed(format!("unexpected result: {v}")),
        Err(e) => CheckStatus::failed(format!("error: {e}")),
    };

    let upload_check = probe_upload_root(state.resumes.upload_root()).await;
    let overall_ok = sqlite_check.ok && upload_check.ok;

    let mut checks = HashMap::new();
    checks.insert("sqlite", sqlite_check);
    checks.insert("upload_root", upload_check);

    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" }.into(),
        checks,
        offload_enabled: state.offload.settings().enabled,
        offload_lock_held: state.offload.holds_lock(),
        scheduler: state.offload.scheduler_state().await,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn probe_upload_root(root: &Path) -> CheckStatus {
    // The leading dot keeps the offload scan away from the probe file.
    let tmp_path = root.join(format!(".readyz-{}", Uuid::new_v4()));
    if let Err(e) = fs::write(&tmp_path, b"readyz").await {
        return CheckStatus::failed(format!("could not write tmp file: {e}"));
    }
    let check = match fs::read(&tmp_path).await {
        Ok(bytes) if bytes == b"readyz" => CheckStatus::ok(),
        Ok(_) => CheckStatus::failed("file content mismatch".to_string()),
        Err(e) => CheckStatus::failed(format!("could not read tmp file: {e}")),
    };
    match fs::remove_file(&tmp_path).await {
        Err(e) if check.ok => CheckStatus {
            ok: true,
            error: Some(format!("could not remove tmp file: {e}")),
        },
        _ => check,
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
    offload_enabled: bool,
    offload_lock_held: bool,
    scheduler: SchedulerState,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}
