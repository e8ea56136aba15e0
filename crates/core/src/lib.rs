pub mod config;
pub mod errors;
pub mod logging;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use errors::{Classified, ErrorClass};
