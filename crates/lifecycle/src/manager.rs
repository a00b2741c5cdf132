//! The model lifecycle manager.
//!
//! State machine: `Unloaded -> Loading -> Loaded -> Unloaded ...` until
//! [`LifecycleManager::shutdown`], after which the manager refuses new work.
//!
//! - Loading is lazy and double-checked: the handle slot is read without the
//!   acquisition lock, and re-read after taking it, so a burst of first calls
//!   issues exactly one `load`.
//! - The acquisition lock only guards the load transition. Inference runs
//!   without any manager lock held.
//! - The handle is reference counted. An eviction that races with an
//!   in-flight call only clears the manager's slot; the call keeps its own
//!   reference until it returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    watcher, ComputeEngine, EngineHandle, EngineInfo, LifecycleError, ManagerConfig, Result,
    SamplingConfig,
};

/// Point-in-time view of the manager, for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    pub engine: EngineInfo,
    pub model_path: String,
    pub loaded: bool,
    pub loading: bool,
    pub shut_down: bool,
    pub idle_secs: u64,
    pub idle_timeout_secs: u64,
    pub loads: u64,
    /// Releases by the idle watcher.
    pub evictions: u64,
    /// All releases, including shutdown.
    pub unloads: u64,
    pub last_load_error: Option<String>,
}

pub struct LifecycleManager {
    engine: Arc<dyn ComputeEngine>,
    config: ManagerConfig,

    handle: RwLock<Option<Arc<dyn EngineHandle>>>,
    load_lock: tokio::sync::Mutex<()>,

    // LastUsedTimestamp, in milliseconds since `epoch`.
    epoch: Instant,
    last_used_ms: AtomicU64,

    stop: CancellationToken,
    watcher: Mutex<Option<JoinHandle<()>>>,

    loads: AtomicU64,
    evictions: AtomicU64,
    unloads: AtomicU64,
    last_load_error: Mutex<Option<String>>,
}

impl LifecycleManager {
    /// Creates an unloaded manager. The idle watcher is not running until
    /// [`start`](Self::start) is called.
    pub fn new(engine: Arc<dyn ComputeEngine>, config: ManagerConfig) -> Self {
        Self {
            engine,
            config,
            handle: RwLock::new(None),
            load_lock: tokio::sync::Mutex::new(()),
            epoch: Instant::now(),
            last_used_ms: AtomicU64::new(0),
            stop: CancellationToken::new(),
            watcher: Mutex::new(None),
            loads: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            unloads: AtomicU64::new(0),
            last_load_error: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Spawns the idle watcher. Calling it again, or after shutdown, does
    /// nothing.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if self.stop.is_cancelled() {
            warn!("start called after shutdown; ignoring");
            return;
        }
        if slot.is_some() {
            debug!("idle watcher already running");
            return;
        }
        *slot = Some(watcher::spawn(
            Arc::downgrade(self),
            self.stop.clone(),
            self.config.poll_interval,
        ));
    }

    /// Stops the idle watcher and releases the model, even if inference
    /// calls are still using it. Later calls to `infer` fail with
    /// [`LifecycleError::ShutDown`].
    pub async fn shutdown(&self) {
        self.stop.cancel();

        let task = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("idle watcher ended abnormally: {e}");
            }
        }

        if let Err(e) = self.unload() {
            warn!("unload during shutdown failed: {e}");
        }
        info!("model manager shut down");
    }

    pub fn is_loaded(&self) -> bool {
        self.handle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn is_shut_down(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Loads the model unless it is already resident.
    pub async fn ensure_loaded(&self) -> Result<()> {
        self.acquire().await.map(|_| ())
    }

    /// Releases the model. Returns `false` if nothing was loaded, in which
    /// case the engine is not touched.
    pub fn unload(&self) -> Result<bool> {
        let released = self
            .handle
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = released else {
            return Ok(false);
        };

        info!("unloading model");
        drop(handle);
        self.unloads.fetch_add(1, Ordering::SeqCst);
        self.engine.reclaim().map_err(LifecycleError::Reclaim)?;
        info!("model unloaded");
        Ok(true)
    }

    /// Runs one generation and returns the first candidate of the first
    /// batch. Extra candidates are discarded.
    pub async fn infer(&self, prompt: &str, params: &SamplingConfig) -> Result<String> {
        if self.stop.is_cancelled() {
            return Err(LifecycleError::ShutDown);
        }
        self.touch();

        let handle = self.acquire().await?;
        let batches = handle
            .infer(prompt, params)
            .await
            .map_err(LifecycleError::Inference)?;

        let text = batches
            .into_iter()
            .next()
            .and_then(|batch| batch.into_iter().next())
            .map(|c| c.text)
            .ok_or_else(|| {
                LifecycleError::Inference(anyhow::anyhow!("engine returned no candidates"))
            })?;

        self.touch();
        Ok(text)
    }

    /// The most recent LastUsedTimestamp.
    pub fn last_used(&self) -> Instant {
        self.epoch + Duration::from_millis(self.last_used_ms.load(Ordering::SeqCst))
    }

    pub fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_used())
    }

    pub fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            engine: self.engine.info(),
            model_path: self.config.model_path.clone(),
            loaded: self.is_loaded(),
            loading: self.load_lock.try_lock().is_err(),
            shut_down: self.is_shut_down(),
            idle_secs: self.idle_for().as_secs(),
            idle_timeout_secs: self.config.idle_timeout.as_secs(),
            loads: self.loads.load(Ordering::SeqCst),
            evictions: self.evictions.load(Ordering::SeqCst),
            unloads: self.unloads.load(Ordering::SeqCst),
            last_load_error: self
                .last_load_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    /// One watcher cycle: release the model if it has been idle too long.
    pub(crate) fn evict_if_idle(&self) -> Result<bool> {
        if !self.is_loaded() {
            return Ok(false);
        }
        let idle = self.idle_for();
        if idle <= self.config.idle_timeout {
            return Ok(false);
        }
        info!(idle_secs = idle.as_secs(), "idle timeout exceeded");
        let result = self.unload();
        // A reclaim failure still means the handle was released.
        if matches!(result, Ok(true) | Err(LifecycleError::Reclaim(_))) {
            self.evictions.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    fn touch(&self) {
        let now = millis(Instant::now().saturating_duration_since(self.epoch));
        self.last_used_ms.fetch_max(now, Ordering::SeqCst);
    }

    fn current(&self) -> Option<Arc<dyn EngineHandle>> {
        self.handle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn acquire(&self) -> Result<Arc<dyn EngineHandle>> {
        if let Some(handle) = self.current() {
            return Ok(handle);
        }

        let _guard = self.load_lock.lock().await;
        // Another caller may have finished loading while we waited.
        if let Some(handle) = self.current() {
            return Ok(handle);
        }
        if self.stop.is_cancelled() {
            return Err(LifecycleError::ShutDown);
        }

        info!(
            model_path = %self.config.model_path,
            gpu_memory_fraction = self.config.gpu_memory_fraction,
            "loading model"
        );
        let started = Instant::now();
        let loaded = self
            .engine
            .load(&self.config.model_path, self.config.gpu_memory_fraction)
            .await;

        let handle = match loaded {
            Ok(handle) => handle,
            Err(e) => {
                warn!("model load failed: {e:#}");
                *self
                    .last_load_error
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(format!("{e:#}"));
                return Err(LifecycleError::Load(e));
            }
        };

        // Checked under the slot lock: shutdown cancels before it takes the
        // same lock to unload, so a stored handle is always seen by it.
        let stored = {
            let mut slot = self.handle.write().unwrap_or_else(PoisonError::into_inner);
            if self.stop.is_cancelled() {
                false
            } else {
                *slot = Some(handle.clone());
                true
            }
        };
        if !stored {
            // Shutdown began while the engine was loading.
            drop(handle);
            if let Err(e) = self.engine.reclaim() {
                warn!("reclaim after aborted load failed: {e:#}");
            }
            return Err(LifecycleError::ShutDown);
        }

        self.loads.fetch_add(1, Ordering::SeqCst);
        *self
            .last_load_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        info!(elapsed_ms = millis(started.elapsed()), "model loaded");
        Ok(handle)
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
