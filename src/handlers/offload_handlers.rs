use crate::{errors::AppError, models::offload::CycleOutcome, state::AppState};
use axum::{Json, extract::State};

/// `POST /admin/offload`: upload and reconcile right now.
///
/// Answers 409 from any process that does not own the offload scheduler.
pub async fn trigger_offload(
    State(state): State<AppState>,
) -> Result<Json<CycleOutcome>, AppError> {
    let outcome = state.offload.run_now().await?;
    tracing::info!(?outcome, "manual offload finished");
    Ok(Json(outcome))
}
