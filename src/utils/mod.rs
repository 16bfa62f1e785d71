//! Utility modules shared by the engine

pub mod env;
pub mod fs;
pub mod logging;
pub mod time;
pub mod timeout;

// Re-export commonly used items
pub use env::{env_int, env_opt, env_words};
#[cfg(feature = "json-logging")]
pub use logging::init_json_logging;
pub use logging::{init_logging, init_logging_from_config};
pub use time::{backup_timestamp, backup_timestamp_now, current_timestamp};
pub use timeout::{with_deadline, DEFAULT_ADAPTER_TIMEOUT};
