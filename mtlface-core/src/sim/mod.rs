//! Deterministic simulated backend.
//!
//! Seeded synthetic batches and small in-memory parameter stores that relax
//! toward fixed targets, so losses decay the way a converging run does.
//! Checkpoints are real safetensors files. Used by the `mtlface` binary and
//! by tests; real models plug in through the same [`Backend`] traits.

mod fas;
mod fr;

pub use fas::{FasPrefetcher, SimFas};
pub use fr::{FrPrefetcher, SimFr};

use rand::Rng;
use rand::rngs::StdRng;

use crate::config::TrainConfig;
use crate::error::{MtlError, Result};
use crate::training::subtrainer::Backend;
use crate::weights::{LoadStateDict, ParamStore, StateDict, Tensor};

/// Per-sample feature width of synthetic images.
pub const FEATURE_DIM: usize = 16;
/// Backbone embedding width.
pub const EMBED_DIM: usize = 8;
/// Identity classes in the synthetic dataset.
pub const NUM_CLASSES: usize = 10;

/// Synthetic batch tensors are flat `Vec<f32>`s.
pub type SimTensor = Vec<f32>;

#[derive(Debug, Clone, Copy, Default)]
pub struct SimBackend;

impl Backend for SimBackend {
    type Fr = SimFr;
    type Fas = SimFas;

    fn build_fr(&self, config: &TrainConfig) -> Result<SimFr> {
        Ok(SimFr::new(config))
    }

    fn build_fas(&self, config: &TrainConfig) -> Result<SimFas> {
        SimFas::new(config)
    }
}

/// Draw a parameter store with values in `[-scale, scale)`.
pub(crate) fn random_store(rng: &mut StdRng, layout: &[(&str, Vec<usize>)], scale: f32) -> ParamStore {
    let mut params = StateDict::new();
    for (name, shape) in layout {
        let len: usize = shape.iter().product();
        let data = (0..len).map(|_| rng.gen_range(-scale..scale)).collect();
        params.insert((*name).to_string(), Tensor { shape: shape.clone(), data });
    }
    ParamStore::new(params)
}

/// One SGD-like step: move each parameter a fraction `step` toward its target,
/// with decoupled weight decay.
pub(crate) fn relax(store: &mut ParamStore, target: &ParamStore, step: f64, weight_decay: f64) {
    let step = step.clamp(0.0, 1.0) as f32;
    let decay = (1.0 - weight_decay.clamp(0.0, 1.0)) as f32;
    for (name, tensor) in store.iter_mut() {
        if let Some(goal) = target.get(name) {
            for (v, t) in tensor.data.iter_mut().zip(&goal.data) {
                *v = (*v + step * (*t - *v)) * decay;
            }
        }
    }
}

/// Root-mean-square distance between two stores over shared keys.
pub(crate) fn gap(store: &ParamStore, target: &ParamStore) -> f64 {
    let (mut sum, mut count) = (0.0f64, 0usize);
    for (name, goal) in target.state_dict() {
        if let Some(tensor) = store.get(&name) {
            for (v, t) in tensor.data.iter().zip(&goal.data) {
                sum += f64::from(v - t).powi(2);
                count += 1;
            }
        }
    }
    if count == 0 { 0.0 } else { (sum / count as f64).sqrt() }
}

pub(crate) fn mean(values: &[f32]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|v| f64::from(*v)).sum::<f64>() / values.len() as f64
}

/// Prefix every key, e.g. `conv1.weight` -> `backbone.conv1.weight`.
pub(crate) fn with_prefix(state: StateDict, prefix: &str) -> StateDict {
    state
        .into_iter()
        .map(|(k, v)| (format!("{prefix}.{k}"), v))
        .collect()
}

/// Keep only keys under `prefix`, with the prefix removed.
pub(crate) fn under_prefix(state: &StateDict, prefix: &str) -> StateDict {
    let head = format!("{prefix}.");
    state
        .iter()
        .filter_map(|(k, v)| k.strip_prefix(&head).map(|rest| (rest.to_string(), v.clone())))
        .collect()
}

/// Effective batch size; `--batch_size 0` means one sample.
pub(crate) fn batch_len(config: &TrainConfig) -> usize {
    (config.batch_size as usize).max(1)
}

pub(crate) fn uninitialized(task: &'static str, what: &str) -> MtlError {
    MtlError::training(task, 0, format!("{what} used before initialization"))
}
