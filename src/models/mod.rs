//! Core data models for the job board's resume pipeline.
//!
//! `application` maps to the SQLite `applications` table via
//! `sqlx::FromRow`; `offload` holds the per-cycle reporting types. Both
//! serialize as JSON via `serde`.

pub mod application;
pub mod offload;
