//! Error types for the mtlface-core crate.
//!
//! Uses `thiserror` for structured variants covering configuration,
//! sub-trainer steps, weight files and checkpoint persistence.

use thiserror::Error;

/// Top-level error type for training orchestration.
#[derive(Debug, Error)]
pub enum MtlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{task} training failed at iteration {iteration}: {message}")]
    Training {
        task: &'static str,
        iteration: u64,
        message: String,
    },

    #[error("Weights error: {0}")]
    Weights(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Loss record error: {0}")]
    LossRecord(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl MtlError {
    pub fn training(task: &'static str, iteration: u64, msg: impl Into<String>) -> Self {
        Self::Training {
            task,
            iteration,
            message: msg.into(),
        }
    }

    pub fn weights(msg: impl Into<String>) -> Self {
        Self::Weights(msg.into())
    }

    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

impl From<safetensors::SafeTensorError> for MtlError {
    fn from(e: safetensors::SafeTensorError) -> Self {
        Self::Weights(e.to_string())
    }
}

/// Errors raised while loading or validating training options.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("--train_fas requires --{name} to be set")]
    MissingFasWeight { name: &'static str },

    #[error("restore_iter ({restore_iter}) must not exceed num_iter ({num_iter})")]
    InvalidIterRange { restore_iter: u64, num_iter: u64 },

    #[error("val_interval must be at least 1")]
    InvalidValInterval,

    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self::Load(e.to_string())
    }
}

/// Result alias used across the crate.
pub type Result<T, E = MtlError> = std::result::Result<T, E>;
