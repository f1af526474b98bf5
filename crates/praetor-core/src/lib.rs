pub mod bridge;
pub mod config;
pub mod cooldown;
pub mod engine;
pub mod event_bus;
pub mod farm;
pub mod hero;
pub mod navigation;
pub mod scheduler;
pub mod storage;
pub mod storage_paths;
pub mod supervisor;
pub mod task_queue;

pub use bridge::*;
pub use config::*;
pub use cooldown::*;
pub use engine::*;
pub use event_bus::*;
pub use farm::*;
pub use hero::*;
pub use navigation::*;
pub use scheduler::*;
pub use storage::*;
pub use storage_paths::*;
pub use supervisor::*;
pub use task_queue::*;

use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
