use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use lifecycle::ManagerConfig;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub model_path: String,
    pub gpu_util: f32,
    pub idle_seconds: u64,
    pub idle_poll_seconds: u64,
    pub bind_addr: String,
    pub engine: EngineConfig,
}

/// How the model server process is launched.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub command: String,
    pub port: u16,
    pub startup_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let model_path = get(&lookup, "MODEL_PATH")?;
        let gpu_util: f32 = parse_or(&lookup, "GPU_UTIL", 0.8)?;
        let idle_seconds: u64 = parse_or(&lookup, "IDLE_SECONDS", 600)?;
        let idle_poll_seconds: u64 = parse_or(&lookup, "IDLE_POLL_SECONDS", 60)?;
        let bind_addr = lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string());

        let engine = EngineConfig {
            command: lookup("ENGINE_COMMAND").unwrap_or_else(|| "python3".to_string()),
            port: parse_or(&lookup, "ENGINE_PORT", 8001)?,
            startup_timeout: Duration::from_secs(parse_or(
                &lookup,
                "ENGINE_STARTUP_TIMEOUT_SECS",
                600,
            )?),
        };

        if model_path.trim().is_empty() {
            bail!("MODEL_PATH must not be empty");
        }
        if !(gpu_util > 0.0 && gpu_util <= 1.0) {
            bail!("GPU_UTIL must be in (0, 1], got {gpu_util}");
        }
        if idle_poll_seconds == 0 {
            bail!("IDLE_POLL_SECONDS must be greater than zero");
        }

        Ok(Self {
            model_path,
            gpu_util,
            idle_seconds,
            idle_poll_seconds,
            bind_addr,
            engine,
        })
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig::new(self.model_path.clone())
            .with_gpu_memory_fraction(self.gpu_util)
            .with_idle_timeout(Duration::from_secs(self.idle_seconds))
            .with_poll_interval(Duration::from_secs(self.idle_poll_seconds))
    }
}

fn get<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str) -> Result<String> {
    lookup(key).with_context(|| format!("Missing required env var: {key}"))
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}
