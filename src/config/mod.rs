//! Configuration types, YAML loading and logging setup
//!
//! - Configuration types (`AppConfig`, `FeedConfig`, `AlertsConfig`, `CatalystsConfig`)
//! - YAML loading (`load_config`)
//! - Defaults with environment variable overrides (`constants`)

pub mod constants;
pub mod logging;
mod loader;
mod types;

pub use types::{AlertsConfig, AppConfig, CatalystsConfig, FeedConfig};

pub use loader::{load_config, load_config_from_str};

pub use logging::init_logging;
