pub mod engine;
pub mod retry;
pub mod status;

pub use engine::{EngineBuilder, EngineConfig, MonitorEngine};
pub use retry::{Backoff, RetryPolicy};
pub use status::{RuntimeStatus, StatusHub};
