use std::sync::Arc;

use lifecycle::LifecycleManager;

pub type SharedState = Arc<AppState>;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<LifecycleManager>,
}

impl AppState {
    pub fn new(manager: Arc<LifecycleManager>) -> Self {
        Self { manager }
    }
}
