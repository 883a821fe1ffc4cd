// src/config/mod.rs

//! Scheduler configuration: TOML model (`model.rs`), loading (`loader.rs`)
//! and validation (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_from_str};
pub use model::{ConfigFile, HostConfig, RawConfigFile, SchedulerConfig};
pub use validate::validate_config;
