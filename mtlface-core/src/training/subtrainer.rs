//! Contracts for the FR and FAS sub-trainers driven by the orchestrator.
//!
//! Model definitions, optimizers and data loading live behind these traits.
//! The orchestrator only moves batches, collects losses and triggers
//! checkpoints.

use std::path::Path;

use crate::config::TrainConfig;
use crate::error::Result;
use crate::training::metrics::{FasLosses, FrLosses};
use crate::training::progress::RankGate;
use crate::weights::{self, LoadStateDict, StateDict};

/// Supplies training batches, usually loading the next one in the background.
pub trait Prefetcher {
    type Batch;

    fn next(&mut self) -> Result<Self::Batch>;
}

/// One FR batch: image, identity label, age, gender.
#[derive(Debug, Clone, PartialEq)]
pub struct FrBatch<T> {
    pub image: T,
    pub label: T,
    pub age: T,
    pub gender: T,
}

/// One FAS batch: target image and target label.
#[derive(Debug, Clone, PartialEq)]
pub struct FasBatch<T> {
    pub image: T,
    pub label: T,
}

/// Composite FAS step input: FR's networks plus both batches.
#[derive(Debug)]
pub struct FasInputs<'a, B, A, T> {
    pub backbone: &'a B,
    pub age_estimator: &'a A,
    pub source_image: &'a T,
    pub target_image: &'a T,
    pub source_label: &'a T,
    pub target_label: &'a T,
}

/// Face-recognition sub-trainer.
pub trait FrTrainer {
    type Tensor;
    type Backbone: LoadStateDict;
    type AgeEstimator: LoadStateDict;
    type Prefetcher: Prefetcher<Batch = FrBatch<Self::Tensor>>;

    fn set_loader(&mut self) -> Result<()>;

    fn set_model(&mut self) -> Result<()>;

    fn prefetcher(&mut self) -> &mut Self::Prefetcher;

    /// One optimizer step.
    fn train(&mut self, inputs: &FrBatch<Self::Tensor>, iteration: u64) -> Result<FrLosses>;

    fn backbone(&self) -> &Self::Backbone;

    fn backbone_mut(&mut self) -> &mut Self::Backbone;

    fn estimation_network(&self) -> &Self::AgeEstimator;

    fn estimation_network_mut(&mut self) -> &mut Self::AgeEstimator;

    /// Save model state. `last` marks the terminal checkpoint of the run.
    fn checkpoints(&mut self, iteration: u64, last: bool, gate: RankGate) -> Result<()>;

    /// Validation hook, called every `val_interval` iterations.
    fn validate(&mut self, _iteration: u64) -> Result<()> {
        Ok(())
    }
}

/// Face-anti-spoofing adversarial sub-trainer conditioned on FR's networks.
pub trait FasTrainer {
    type Tensor;
    type Backbone;
    type AgeEstimator;
    type Prefetcher: Prefetcher<Batch = FasBatch<Self::Tensor>>;

    fn set_loader(&mut self) -> Result<()>;

    fn set_model(&mut self) -> Result<()>;

    fn prefetcher(&mut self) -> &mut Self::Prefetcher;

    fn train(
        &mut self,
        inputs: FasInputs<'_, Self::Backbone, Self::AgeEstimator, Self::Tensor>,
        iteration: u64,
    ) -> Result<FasLosses>;

    fn checkpoints(&mut self, iteration: u64, last: bool, gate: RankGate) -> Result<()>;

    fn validate(&mut self, _iteration: u64) -> Result<()> {
        Ok(())
    }
}

/// Builds the sub-trainers for a run and loads pretrained weight files.
pub trait Backend {
    type Fr: FrTrainer;
    type Fas: FasTrainer<
            Tensor = <Self::Fr as FrTrainer>::Tensor,
            Backbone = <Self::Fr as FrTrainer>::Backbone,
            AgeEstimator = <Self::Fr as FrTrainer>::AgeEstimator,
        >;

    fn build_fr(&self, config: &TrainConfig) -> Result<Self::Fr>;

    fn build_fas(&self, config: &TrainConfig) -> Result<Self::Fas>;

    fn load_network(&self, path: &Path) -> Result<StateDict> {
        weights::load_network(path)
    }
}
