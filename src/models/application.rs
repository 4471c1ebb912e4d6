//! Represents a job application and the resume it references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A job seeker's application to one job posting.
///
/// The job and user tables belong to the wider job board; only the ids are
/// kept here so resume reads can be checked against a real submission.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Application {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Job posting applied to.
    pub job_id: i64,

    /// Applicant (job seeker) user id.
    pub applicant_id: i64,

    /// Logical resume path, `{applicant_id}/{filename}`, if one was uploaded.
    pub resume_path: Option<String>,

    /// Review status (applied, pending, reviewed, rejected, shortlisted, hired).
    pub status: String,

    /// When the application was submitted.
    pub applied_at: DateTime<Utc>,
}
