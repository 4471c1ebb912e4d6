pub mod application_service;
pub mod lock_service;
pub mod offload_service;
pub mod resume_service;
pub mod scheduler_service;
