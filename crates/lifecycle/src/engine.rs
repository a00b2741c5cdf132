use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::SamplingConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineInfo {
    pub name: String,
    pub detail: String,
}

/// One generated output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub text: String,
}

/// Loads the model. `load` is expected to be slow (seconds to minutes).
#[async_trait]
pub trait ComputeEngine: Send + Sync {
    async fn load(
        &self,
        model_path: &str,
        gpu_memory_fraction: f32,
    ) -> anyhow::Result<Arc<dyn EngineHandle>>;

    /// Called after the manager has dropped its handle, to hand memory
    /// back to the system.
    fn reclaim(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn info(&self) -> EngineInfo;
}

/// A loaded model. Must tolerate concurrent `infer` calls.
#[async_trait]
pub trait EngineHandle: Send + Sync {
    /// Returns output batches, each holding one or more candidates.
    async fn infer(
        &self,
        prompt: &str,
        params: &SamplingConfig,
    ) -> anyhow::Result<Vec<Vec<Candidate>>>;
}
