//! Lazy model lifecycle management.
//!
//! Defers loading an expensive, singleton compute engine until the first
//! inference call and releases it again once it has been idle for longer
//! than the configured threshold.

pub mod config;
pub mod engine;
pub mod error;
pub mod manager;
pub mod sampling;
mod watcher;

pub use config::*;
pub use engine::*;
pub use error::*;
pub use manager::*;
pub use sampling::*;
