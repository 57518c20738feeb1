//! Multi-task training orchestrator.
//!
//! Owns the FR sub-trainer (always) and the FAS sub-trainer (when enabled),
//! wires pretrained weights into FR's networks and drives the iteration loop.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::TrainConfig;
use crate::error::Result;
use crate::training::callbacks::{BestLossWatermark, CallbackAction};
use crate::training::metrics::{FasLosses, FrLosses, LossRecord};
use crate::training::progress::iteration_bar;
use crate::training::subtrainer::{Backend, FasInputs, FasTrainer, FrTrainer, Prefetcher};
use crate::weights::{LoadReport, LoadStateDict};

/// Summary of a finished `fit`.
#[derive(Debug, Clone)]
pub struct FitReport {
    pub iterations: u64,
    pub fr: Option<LossRecord>,
    pub fas: Option<LossRecord>,
    /// Lowest summed FR loss; `None` if FR training was off or never beat the sentinel.
    pub best_fr_loss: Option<f64>,
    pub fr_checkpoint_calls: usize,
    pub fas_checkpoint_calls: usize,
    pub loss_path: PathBuf,
}

pub struct MtlFace<B: Backend> {
    config: TrainConfig,
    fr: B::Fr,
    fas: Option<B::Fas>,
}

impl<B: Backend> MtlFace<B> {
    /// Build the sub-trainers.
    ///
    /// FR is constructed unconditionally since FAS consumes its backbone and
    /// age-estimation network. Pretrained files are applied non-strictly.
    pub fn new(config: TrainConfig, backend: &B) -> Result<Self> {
        let mut fr = backend.build_fr(&config)?;
        fr.set_loader()?;
        fr.set_model()?;

        let fas = match &config.fas {
            Some(fas_config) => {
                if let Some(path) = &fas_config.id_pretrained_path {
                    let state = backend.load_network(path)?;
                    let report = fr.backbone_mut().load_state_dict(&state, false)?;
                    log_partial_load("backbone", path, &report);
                }
                if let Some(path) = &fas_config.age_pretrained_path {
                    let state = backend.load_network(path)?;
                    let report = fr.estimation_network_mut().load_state_dict(&state, false)?;
                    log_partial_load("estimation_network", path, &report);
                }

                let mut fas = backend.build_fas(&config)?;
                fas.set_loader()?;
                fas.set_model()?;
                Some(fas)
            }
            None => None,
        };

        info!(
            train_fr = config.train_fr,
            train_fas = fas.is_some(),
            restore_iter = config.restore_iter,
            num_iter = config.num_iter,
            local_rank = config.local_rank,
            "sub-trainers ready"
        );

        Ok(Self { config, fr, fas })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn fr(&self) -> &B::Fr {
        &self.fr
    }

    pub fn fas(&self) -> Option<&B::Fas> {
        self.fas.as_ref()
    }

    /// Run iterations `restore_iter + 1 ..= num_iter`, then write the loss CSV.
    ///
    /// Any sub-trainer, checkpoint or CSV error aborts the run.
    pub fn fit(&mut self) -> Result<FitReport> {
        let Self { config, fr, fas } = self;
        let gate = config.rank_gate();
        let range = config.iterations();
        let pb = iteration_bar(&range, gate);

        let mut watermark = BestLossWatermark::new();
        let mut fr_record = LossRecord::for_row::<FrLosses>();
        let mut fas_record = LossRecord::for_row::<FasLosses>();
        let mut fr_checkpoint_calls = 0;
        let mut fas_checkpoint_calls = 0;

        for n_iter in range {
            let last = n_iter == config.num_iter;
            let fr_inputs = fr.prefetcher().next()?;

            if config.train_fr {
                let losses = fr.train(&fr_inputs, n_iter)?;
                fr_record.push(&losses)?;
                if watermark.observe(losses.total()) == CallbackAction::Checkpoint {
                    fr.checkpoints(n_iter, false, gate)?;
                    fr_checkpoint_calls += 1;
                }
                if last {
                    fr.checkpoints(n_iter, true, gate)?;
                    fr_checkpoint_calls += 1;
                }
                debug!(
                    n_iter,
                    id = losses.id,
                    da = losses.da,
                    age = losses.age,
                    best = watermark.best(),
                    "fr step"
                );
            }

            if let Some(fas) = fas.as_mut() {
                let fas_inputs = fas.prefetcher().next()?;
                let inputs = FasInputs {
                    backbone: fr.backbone(),
                    age_estimator: fr.estimation_network(),
                    source_image: &fr_inputs.image,
                    target_image: &fas_inputs.image,
                    source_label: &fr_inputs.label,
                    target_label: &fas_inputs.label,
                };
                let losses = fas.train(inputs, n_iter)?;
                fas_record.push(&losses)?;
                if last {
                    fas.checkpoints(n_iter, true, gate)?;
                    fas_checkpoint_calls += 1;
                }
                debug!(
                    n_iter,
                    d_loss = losses.d_loss,
                    g_logit = losses.g_logit,
                    "fas step"
                );
            }

            if n_iter % config.val_interval == 0 {
                if config.train_fr {
                    fr.validate(n_iter)?;
                }
                if let Some(fas) = fas.as_mut() {
                    fas.validate(n_iter)?;
                }
            }

            pb.inc(1);
        }
        pb.finish_and_clear();

        let fr_record = config.train_fr.then_some(fr_record);
        let fas_record = fas.is_some().then_some(fas_record);

        if let Some(record) = &fr_record {
            info!(path = %config.loss_path.display(), rows = record.len(), "saving FR loss values");
            record.write_csv(&config.loss_path)?;
        }
        if let Some(record) = &fas_record {
            if fr_record.is_some() {
                warn!(
                    path = %config.loss_path.display(),
                    "FR and FAS share the loss file; FAS values overwrite FR values"
                );
            }
            info!(path = %config.loss_path.display(), rows = record.len(), "saving FAS loss values");
            record.write_csv(&config.loss_path)?;
        }

        let best_fr_loss = (watermark.updates() > 0).then(|| watermark.best());
        Ok(FitReport {
            iterations: config.iteration_count(),
            fr: fr_record,
            fas: fas_record,
            best_fr_loss,
            fr_checkpoint_calls,
            fas_checkpoint_calls,
            loss_path: config.loss_path.clone(),
        })
    }
}

fn log_partial_load(module: &str, path: &Path, report: &LoadReport) {
    info!(
        module,
        path = %path.display(),
        loaded = report.loaded.len(),
        "pretrained weights applied"
    );
    if !report.is_complete() {
        warn!(
            module,
            missing = ?report.missing_keys,
            unexpected = ?report.unexpected_keys,
            mismatched = ?report.mismatched_keys,
            "partial load: some keys were skipped"
        );
    }
}
