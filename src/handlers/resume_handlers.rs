//! HTTP handlers for resume submission and retrieval.
//! Resume bodies are streamed from local disk or the offload bucket, never
//! buffered whole.

use crate::{
    errors::AppError,
    models::application::Application,
    services::resume_service::{
        DEFAULT_CONTENT_TYPE, Resolution, content_type_for, ensure_logical_path_safe,
    },
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// Download a resume `/resumes/{*path}`.
///
/// Only paths referenced by an application are served. The local copy wins;
/// offloaded resumes are streamed back from the bucket.
pub async fn get_resume(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, AppError> {
    ensure_logical_path_safe(&path)?;
    if state
        .applications
        .find_by_resume_path(&path)
        .await?
        .is_none()
    {
        return Err(AppError::not_found("resume not found"));
    }

    let settings = state.offload.settings();
    let resolution = state
        .resumes
        .resolve(&path, settings.enabled, settings.usable_bucket())
        .await?;

    let (body, headers) = match resolution {
        Resolution::Local { path: local_path, file } => {
            debug!(path = %local_path.display(), "streaming local resume");
            let meta = file.metadata().await.ok();
            let headers = ResumeHeaders {
                content_type: content_type_for(&path).to_string(),
                length: meta.as_ref().map(|meta| meta.len()),
                etag: None,
                last_modified: meta
                    .and_then(|meta| meta.modified().ok())
                    .map(DateTime::<Utc>::from),
            };
            (Body::from_stream(ReaderStream::new(file)), headers)
        }
        Resolution::Remote { key, object } => {
            debug!(key, "streaming offloaded resume");
            let guessed = content_type_for(&path);
            let headers = ResumeHeaders {
                content_type: match object.content_type {
                    Some(stored) if guessed == DEFAULT_CONTENT_TYPE => stored,
                    _ => guessed.to_string(),
                },
                length: object
                    .meta
                    .size_bytes
                    .and_then(|size| u64::try_from(size).ok()),
                etag: object.meta.etag,
                last_modified: object.meta.last_modified,
            };
            (Body::from_stream(ReaderStream::new(object.body)), headers)
        }
        Resolution::NotFound => return Err(AppError::not_found("resume not found")),
    };

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    headers.apply(response.headers_mut(), &path);
    Ok(response)
}

/// Submit an application with a resume: `POST /jobs/{job_id}/applications`.
///
/// Multipart fields: `applicant_id` (text) and `resume` (file).
pub async fn submit_application(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Application>), AppError> {
    let mut applicant_id: Option<i64> = None;
    let mut resume: Option<(String, Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.to_string()))?
    {
        match field.name() {
            Some("applicant_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(err.to_string()))?;
                let id = text
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| AppError::bad_request("applicant_id must be an integer"))?;
                applicant_id = Some(id);
            }
            Some("resume") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|err| AppError::bad_request(err.to_string()))?;
                resume = Some((file_name, data));
            }
            _ => {}
        }
    }

    let applicant_id = applicant_id.ok_or_else(|| AppError::bad_request("applicant_id is required"))?;
    let (file_name, data) = resume
        .filter(|(name, data)| !name.is_empty() && !data.is_empty())
        .ok_or_else(|| AppError::bad_request("resume file is required"))?;

    // The record goes in before the file so a rejected duplicate never
    // leaves a resume on disk for the offload cycle to pick up.
    let logical_path = state.resumes.allocate_path(applicant_id, &file_name)?;
    let application = state
        .applications
        .create(job_id, applicant_id, Some(&logical_path))
        .await?;

    if let Err(err) = state.resumes.write_upload(&logical_path, data).await {
        if let Err(delete_err) = state.applications.delete(application.id).await {
            warn!(
                application = %application.id,
                error = %delete_err,
                "could not remove application after failed resume write"
            );
        }
        return Err(err.into());
    }

    info!(job_id, applicant_id, resume = %logical_path, "application submitted");
    Ok((StatusCode::CREATED, Json(application)))
}

struct ResumeHeaders {
    content_type: String,
    length: Option<u64>,
    etag: Option<String>,
    last_modified: Option<DateTime<Utc>>,
}

impl ResumeHeaders {
    fn apply(self, headers: &mut HeaderMap, path: &str) {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(&self.content_type)
                .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
        );
        if let Some(length) = self.length {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
        }
        if let Some(etag) = self.etag
            && let Ok(value) = HeaderValue::from_str(&format!("\"{etag}\""))
        {
            headers.insert(header::ETAG, value);
        }
        if let Some(modified) = self.last_modified
            && let Ok(value) = HeaderValue::from_str(&modified.to_rfc2822())
        {
            headers.insert(header::LAST_MODIFIED, value);
        }
        if let Some(name) = path.rsplit('/').next()
            && let Ok(value) = HeaderValue::from_str(&format!("inline; filename=\"{name}\""))
        {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }
}
