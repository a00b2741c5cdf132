use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("model load failed: {0:#}")]
    Load(#[source] anyhow::Error),

    #[error("inference failed: {0:#}")]
    Inference(#[source] anyhow::Error),

    #[error("memory reclamation failed: {0:#}")]
    Reclaim(#[source] anyhow::Error),

    #[error("model manager is shut down")]
    ShutDown,
}

impl LifecycleError {
    /// Stable identifier for translating into protocol-level failures.
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleError::Load(_) => "load",
            LifecycleError::Inference(_) => "inference",
            LifecycleError::Reclaim(_) => "reclaim",
            LifecycleError::ShutDown => "shut_down",
        }
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_includes_cause_chain() {
        let cause = anyhow::anyhow!("out of memory").context("starting engine");
        let err = LifecycleError::Load(cause);
        assert_eq!(err.kind(), "load");
        let msg = err.to_string();
        assert!(msg.contains("starting engine"));
        assert!(msg.contains("out of memory"));
    }
}
