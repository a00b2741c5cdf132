use serde::{Deserialize, Serialize};

/// Options controlling a single generation call.
///
/// Serialized names follow the OpenAI-compatible completion API so engine
/// adapters can forward the struct as-is.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Number of candidate outputs to generate.
    #[serde(rename = "n")]
    pub count: u32,
    pub temperature: f32,
    #[serde(rename = "top_p")]
    pub nucleus_probability: f32,
    pub repetition_penalty: f32,
    #[serde(rename = "max_tokens")]
    pub max_output_tokens: u32,
    pub seed: u64,
}

pub const DEFAULT_COUNT: u32 = 1;
pub const DEFAULT_TEMPERATURE: f32 = 1.0;
pub const DEFAULT_NUCLEUS_PROBABILITY: f32 = 0.7;
pub const DEFAULT_REPETITION_PENALTY: f32 = 1.1;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1024;
pub const DEFAULT_SEED: u64 = 42;

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            count: DEFAULT_COUNT,
            temperature: DEFAULT_TEMPERATURE,
            nucleus_probability: DEFAULT_NUCLEUS_PROBABILITY,
            repetition_penalty: DEFAULT_REPETITION_PENALTY,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            seed: DEFAULT_SEED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let p = SamplingConfig::default();
        assert_eq!(p.count, 1);
        assert_eq!(p.temperature, 1.0);
        assert_eq!(p.nucleus_probability, 0.7);
        assert_eq!(p.repetition_penalty, 1.1);
        assert_eq!(p.max_output_tokens, 1024);
        assert_eq!(p.seed, 42);
    }

    #[test]
    fn test_serializes_with_completion_api_names() {
        let json = serde_json::to_value(SamplingConfig::default()).unwrap();
        assert_eq!(json["n"], 1);
        assert_eq!(json["max_tokens"], 1024);
        assert_eq!(json["seed"], 42);
        assert!(json.get("top_p").is_some());
        assert!(json.get("count").is_none());
    }
}
