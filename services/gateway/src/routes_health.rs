use axum::{extract::State, Json};

use crate::state::SharedState;
use crate::types::HealthResponse;

pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        loaded: state.manager.is_loaded(),
    })
}
