pub mod health_handlers;
pub mod offload_handlers;
pub mod resume_handlers;
