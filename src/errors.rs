// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClusterqError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Sequence not found: {0}")]
    SequenceNotFound(u32),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Host not found: {0}")]
    HostNotFound(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Scheduler lock held: {0}")]
    LockHeld(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ClusterqError>;
