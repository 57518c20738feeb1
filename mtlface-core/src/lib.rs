//! # mtlface-core: multi-task FR / FAS training orchestration
//!
//! Drives a face-recognition sub-trainer and an optional adversarial
//! face-anti-spoofing sub-trainer through one shared iteration loop:
//! batch prefetch, delegated optimizer steps, best-loss checkpointing and
//! CSV loss logging. Models, optimizers and data loading are supplied by a
//! [`training::Backend`]; the [`sim`] module provides a deterministic one.

pub mod config;
pub mod error;
pub mod persistence;
pub mod schedule;
pub mod sim;
pub mod training;
pub mod weights;

pub use config::{FasConfig, TrainConfig, TrainOptions, load_options};
pub use error::{ConfigError, MtlError, Result};
pub use training::{FitReport, MtlFace};
