//! src/services/application_service.rs
//!
//! ApplicationService: the slice of the job board's relational store the
//! resume pipeline relies on: recording which application a stored resume
//! belongs to, and looking it up again before a resume is served.

use crate::models::application::Application;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("applicant {applicant_id} already applied to job {job_id}")]
    Duplicate { job_id: i64, applicant_id: i64 },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type ApplicationResult<T> = Result<T, ApplicationError>;

#[derive(Clone)]
pub struct ApplicationService {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl ApplicationService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert a new application. One application per applicant and job.
    pub async fn create(
        &self,
        job_id: i64,
        applicant_id: i64,
        resume_path: Option<&str>,
    ) -> ApplicationResult<Application> {
        sqlx::query_as::<_, Application>(
            "INSERT INTO applications (id, job_id, applicant_id, resume_path, status, applied_at)
             VALUES (?, ?, ?, ?, 'applied', ?)
             RETURNING id, job_id, applicant_id, resume_path, status, applied_at",
        )
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(applicant_id)
        .bind(resume_path)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                ApplicationError::Duplicate {
                    job_id,
                    applicant_id,
                }
            } else {
                ApplicationError::Sqlx(err)
            }
        })
    }

    /// Remove an application whose resume could not be stored.
    pub async fn delete(&self, id: Uuid) -> ApplicationResult<()> {
        sqlx::query("DELETE FROM applications WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// Application referencing the logical resume path, if any.
    pub async fn find_by_resume_path(
        &self,
        resume_path: &str,
    ) -> ApplicationResult<Option<Application>> {
        let application = sqlx::query_as::<_, Application>(
            "SELECT id, job_id, applicant_id, resume_path, status, applied_at
             FROM applications WHERE resume_path = ? LIMIT 1",
        )
        .bind(resume_path)
        .fetch_optional(&*self.db)
        .await?;
        Ok(application)
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
