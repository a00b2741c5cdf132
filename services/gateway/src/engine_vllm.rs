use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use lifecycle::{Candidate, ComputeEngine, EngineHandle, EngineInfo, SamplingConfig};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::config::EngineConfig;

const READY_POLL_EVERY: Duration = Duration::from_secs(1);

/// Runs the model inside a vLLM OpenAI-compatible server process.
///
/// Loading spawns the process and waits for it to answer. `reclaim` kills
/// it, which frees the accelerator memory; calls still in flight on the old
/// handle then fail. At most one server process exists at a time: `load`
/// reaps the previous one before spawning, since both bind the same port.
pub struct VllmEngine {
    cfg: EngineConfig,
    client: reqwest::Client,
    process: Mutex<Option<Child>>,
}

impl VllmEngine {
    pub fn new(cfg: EngineConfig) -> Self {
        Self {
            cfg,
            client: reqwest::Client::new(),
            process: Mutex::new(None),
        }
    }

    fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.cfg.port)
    }

    fn process_slot(&self) -> std::sync::MutexGuard<'_, Option<Child>> {
        self.process.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Kills the previous server process, if any, and waits for it to exit.
    async fn retire_previous(&self) -> anyhow::Result<()> {
        let previous = self.process_slot().take();
        let Some(mut child) = previous else {
            return Ok(());
        };
        // Already signalled by `reclaim`, or exited by itself.
        let _ = child.start_kill();
        let status = child
            .wait()
            .await
            .context("failed to reap previous engine process")?;
        info!(%status, "previous engine process exited");
        Ok(())
    }
}

struct VllmHandle {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(flatten)]
    params: &'a SamplingConfig,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    text: String,
}

#[async_trait]
impl ComputeEngine for VllmEngine {
    async fn load(
        &self,
        model_path: &str,
        gpu_memory_fraction: f32,
    ) -> anyhow::Result<Arc<dyn EngineHandle>> {
        self.retire_previous().await?;

        let mut cmd = Command::new(&self.cfg.command);
        cmd.args(["-m", "vllm.entrypoints.openai.api_server", "--model", model_path])
            .arg("--gpu-memory-utilization")
            .arg(gpu_memory_fraction.to_string())
            .arg("--port")
            .arg(self.cfg.port.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn engine process `{}`", self.cfg.command))?;
        forward_output(&mut child);

        let base_url = self.base_url();
        // On error the child is dropped here, which kills it.
        wait_until_ready(&self.client, &base_url, &mut child, self.cfg.startup_timeout).await?;
        info!(pid = ?child.id(), %base_url, "engine process ready");

        *self.process_slot() = Some(child);

        Ok(Arc::new(VllmHandle {
            base_url,
            model: model_path.to_string(),
            client: self.client.clone(),
        }))
    }

    fn reclaim(&self) -> anyhow::Result<()> {
        let mut slot = self.process_slot();
        let Some(child) = slot.as_mut() else {
            return Ok(());
        };
        // Reaped by the next `load`, or on drop.
        if child.try_wait().context("failed to poll engine process")?.is_none() {
            info!(pid = ?child.id(), "stopping engine process");
            child.start_kill().context("failed to kill engine process")?;
        }
        Ok(())
    }

    fn info(&self) -> EngineInfo {
        EngineInfo {
            name: "vllm".to_string(),
            detail: format!("{} on {}", self.cfg.command, self.base_url()),
        }
    }
}

#[async_trait]
impl EngineHandle for VllmHandle {
    async fn infer(
        &self,
        prompt: &str,
        params: &SamplingConfig,
    ) -> anyhow::Result<Vec<Vec<Candidate>>> {
        let body = CompletionRequest {
            model: &self.model,
            prompt,
            params,
        };

        let url = format!("{}/v1/completions", self.base_url);
        let resp: CompletionResponse = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .context("engine request failed")?
            .error_for_status()?
            .json()
            .await
            .context("engine returned malformed completion")?;

        Ok(vec![into_candidates(resp)])
    }
}

fn into_candidates(resp: CompletionResponse) -> Vec<Candidate> {
    resp.choices
        .into_iter()
        .map(|c| Candidate { text: c.text })
        .collect()
}

/// Streams the process's stdout/stderr into the log.
fn forward_output(child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(source = "stdout", "engine: {line}");
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(source = "stderr", "engine: {line}");
            }
        });
    }
}

async fn wait_until_ready(
    client: &reqwest::Client,
    base_url: &str,
    child: &mut Child,
    timeout: Duration,
) -> anyhow::Result<()> {
    let deadline = Instant::now() + timeout;
    let url = format!("{base_url}/v1/models");

    loop {
        if let Some(status) = child.try_wait().context("failed to poll engine process")? {
            bail!("engine process exited during startup: {status}");
        }

        match client.get(&url).send().await {
            // The port must be served by this child, not a leftover process.
            Ok(resp) if resp.status().is_success() => {
                if let Some(status) = child.try_wait().context("failed to poll engine process")? {
                    bail!("engine process exited during startup: {status}");
                }
                return Ok(());
            }
            Ok(resp) => debug!(status = %resp.status(), "engine not ready yet"),
            Err(e) => debug!("engine not ready yet: {e}"),
        }

        if Instant::now() >= deadline {
            bail!("engine did not become ready within {}s", timeout.as_secs());
        }
        sleep(READY_POLL_EVERY).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_request_body() {
        let params = SamplingConfig::default();
        let body = CompletionRequest {
            model: "/models/gpt-oss-20b",
            prompt: "hello",
            params: &params,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "/models/gpt-oss-20b");
        assert_eq!(json["prompt"], "hello");
        assert_eq!(json["n"], 1);
        assert_eq!(json["max_tokens"], 1024);
        assert_eq!(json["seed"], 42);
    }

    #[test]
    fn test_all_choices_form_one_batch() {
        let resp: CompletionResponse = serde_json::from_str(
            r#"{"id":"cmpl-1","choices":[{"index":0,"text":"a"},{"index":1,"text":"b"}]}"#,
        )
        .unwrap();
        let batch = into_candidates(resp);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].text, "a");
    }

    fn missing_engine() -> VllmEngine {
        VllmEngine::new(EngineConfig {
            command: "/nonexistent/engine-binary".to_string(),
            port: 18001,
            startup_timeout: Duration::from_secs(1),
        })
    }

    fn load_error(result: anyhow::Result<Arc<dyn EngineHandle>>) -> anyhow::Error {
        match result {
            Ok(_) => panic!("load should fail"),
            Err(e) => e,
        }
    }

    #[cfg(unix)]
    fn sleeper() -> Child {
        Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn test_load_fails_when_command_missing() {
        let engine = missing_engine();
        let err = load_error(engine.load("/models/none", 0.8).await);
        assert!(err.to_string().contains("failed to spawn engine process"));
    }

    #[tokio::test]
    async fn test_reclaim_without_process_is_noop() {
        let engine = missing_engine();
        engine.reclaim().unwrap();
        assert!(engine.process_slot().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reclaim_kills_engine_process() {
        let engine = missing_engine();
        *engine.process_slot() = Some(sleeper());

        engine.reclaim().unwrap();

        let mut child = engine.process_slot().take().unwrap();
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .expect("engine process should exit after reclaim")
            .unwrap();
        assert!(!status.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reload_reaps_previous_process_before_spawning() {
        let engine = missing_engine();
        // A server left over from the previous load, never reclaimed.
        *engine.process_slot() = Some(sleeper());

        let err = tokio::time::timeout(Duration::from_secs(5), engine.load("/models/m", 0.8))
            .await
            .expect("previous process should be reaped promptly");
        let err = load_error(err);

        // The old process was gone before the new spawn was attempted.
        assert!(err.to_string().contains("failed to spawn engine process"));
        assert!(engine.process_slot().is_none());
    }
}
