//! Defines routes for the resume pipeline.
//!
//! ## Structure
//! - `GET  /healthz`, `GET /readyz`: liveness and readiness
//! - `POST /jobs/{job_id}/applications`: submit an application with a resume
//! - `GET  /resumes/{*path}`: download a resume, local or offloaded
//! - `POST /admin/offload`: run an offload cycle now
//!
//! The wildcard `*path` carries logical paths like `42/1a2b3c4d_cv.pdf`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        offload_handlers::trigger_offload,
        resume_handlers::{get_resume, submit_application},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Largest accepted application upload.
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Build and return the router carrying `AppState` to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/jobs/{job_id}/applications",
            post(submit_application).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/resumes/{*path}", get(get_resume))
        .route("/admin/offload", post(trigger_offload))
}
