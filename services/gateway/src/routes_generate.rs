use axum::{extract::State, http::StatusCode, Json};
use tracing::{error, info, info_span, Instrument};

use crate::state::SharedState;
use crate::types::{api_error, ApiError, GenerateRequest, GenerateResponse};

pub async fn generate(
    State(state): State<SharedState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, (StatusCode, Json<ApiError>)> {
    let span = info_span!("generate", request_id = %req.request_id);

    async move {
        info!(
            prompt_chars = req.query.chars().count(),
            n = req.n,
            "generation requested"
        );
        match state.manager.infer(&req.query, &req.sampling()).await {
            Ok(response) => Ok(Json(GenerateResponse { response })),
            Err(e) => {
                error!(kind = e.kind(), "generation failed: {e}");
                Err(api_error(&e))
            }
        }
    }
    .instrument(span)
    .await
}
