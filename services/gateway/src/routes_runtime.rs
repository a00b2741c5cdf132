use axum::{extract::State, Json};
use lifecycle::RuntimeStatus;

use crate::state::SharedState;

pub async fn get_runtime(State(state): State<SharedState>) -> Json<RuntimeStatus> {
    Json(state.manager.status())
}
