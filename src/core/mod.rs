// Infrastructure shared by every area of the crate

pub mod config;
pub mod errors;
pub mod logging;

pub use config::{LoggingConfig, SchedulerConfig, SchedulerConfigBuilder};
pub use errors::{DispatchError, ErrorCategory, Result};
pub use logging::init_tracing;
