//! Configuration Module
//!
//! TOML file loading with environment-variable credential resolution.

pub mod loader;

pub use loader::{default_config_path, load_config, load_or_default, Config, ConfigError};
