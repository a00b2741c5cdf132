use std::time::Duration;

pub const DEFAULT_GPU_MEMORY_FRACTION: f32 = 0.8;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct ManagerConfig {
    pub model_path: String,
    /// Fraction of accelerator memory the engine may reserve.
    pub gpu_memory_fraction: f32,
    /// The model is released once it has been unused for longer than this.
    pub idle_timeout: Duration,
    /// How often the idle watcher wakes up.
    pub poll_interval: Duration,
}

impl ManagerConfig {
    pub fn new(model_path: impl Into<String>) -> Self {
        Self {
            model_path: model_path.into(),
            gpu_memory_fraction: DEFAULT_GPU_MEMORY_FRACTION,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_gpu_memory_fraction(mut self, fraction: f32) -> Self {
        self.gpu_memory_fraction = fraction;
        self
    }
}
