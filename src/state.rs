use crate::{
    context::OffloadContext,
    services::{application_service::ApplicationService, resume_service::ResumeService},
};
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub applications: ApplicationService,
    pub resumes: ResumeService,
    pub offload: Arc<OffloadContext>,
}
