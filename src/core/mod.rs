//! 核心支撑：错误类型、执行工具集、响应缓存、速率限制

pub mod cache;
pub mod error;
pub mod ratelimit;
pub mod util;

pub use cache::ResponseCache;
pub use error::{OrchestratorError, Result};
pub use ratelimit::RateLimiter;
pub use util::{backoff_delay, cache_key, new_run_id, with_deadline};
