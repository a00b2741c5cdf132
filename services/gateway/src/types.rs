use axum::{http::StatusCode, Json};
use lifecycle::{LifecycleError, SamplingConfig};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize)]
pub struct GenerateRequest {
    /// Only used to correlate logs.
    #[serde(alias = "requestId")]
    pub request_id: String,
    pub query: String,
    #[serde(default = "default_n")]
    pub n: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_n() -> u32 {
    lifecycle::DEFAULT_COUNT
}
fn default_top_p() -> f32 {
    lifecycle::DEFAULT_NUCLEUS_PROBABILITY
}
fn default_temperature() -> f32 {
    lifecycle::DEFAULT_TEMPERATURE
}
fn default_max_tokens() -> u32 {
    lifecycle::DEFAULT_MAX_OUTPUT_TOKENS
}
fn default_seed() -> u64 {
    lifecycle::DEFAULT_SEED
}

impl GenerateRequest {
    /// Repetition penalty is not caller-configurable.
    pub fn sampling(&self) -> SamplingConfig {
        SamplingConfig {
            count: self.n,
            temperature: self.temperature,
            nucleus_probability: self.top_p,
            repetition_penalty: lifecycle::DEFAULT_REPETITION_PENALTY,
            max_output_tokens: self.max_tokens,
            seed: self.seed,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub loaded: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub detail: String,
    pub kind: String,
}

pub fn api_error(e: &LifecycleError) -> (StatusCode, Json<ApiError>) {
    let status = match e {
        LifecycleError::Load(_) | LifecycleError::ShutDown => StatusCode::SERVICE_UNAVAILABLE,
        LifecycleError::Inference(_) | LifecycleError::Reclaim(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ApiError {
            detail: e.to_string(),
            kind: e.kind().to_string(),
        }),
    )
}
