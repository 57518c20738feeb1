use rand::Rng;
use rand::rngs::StdRng;

use super::{
    EMBED_DIM, FEATURE_DIM, NUM_CLASSES, SimTensor, batch_len, gap, mean, random_store, relax,
    uninitialized, with_prefix,
};
use crate::config::{FasConfig, TrainConfig};
use crate::error::{MtlError, Result};
use crate::schedule::LrSchedule;
use crate::training::checkpoint::CheckpointManager;
use crate::training::metrics::FasLosses;
use crate::training::progress::RankGate;
use crate::training::reproducibility::SeedManager;
use crate::training::subtrainer::{FasBatch, FasInputs, FasTrainer, Prefetcher};
use crate::weights::{LoadStateDict, ParamStore};

const TASK: &str = "fas";

/// Synthetic FAS batches (target image, target label).
#[derive(Debug)]
pub struct FasPrefetcher {
    rng: StdRng,
    batch_size: usize,
    pending: Option<FasBatch<SimTensor>>,
}

impl FasPrefetcher {
    fn load(&mut self) -> FasBatch<SimTensor> {
        let n = self.batch_size;
        let rng = &mut self.rng;
        FasBatch {
            image: (0..n * FEATURE_DIM).map(|_| rng.r#gen::<f32>()).collect(),
            label: (0..n).map(|_| rng.gen_range(0..NUM_CLASSES) as f32).collect(),
        }
    }
}

impl Prefetcher for FasPrefetcher {
    type Batch = FasBatch<SimTensor>;

    fn next(&mut self) -> Result<Self::Batch> {
        let batch = self
            .pending
            .take()
            .ok_or_else(|| uninitialized(TASK, "data loader"))?;
        self.pending = Some(self.load());
        Ok(batch)
    }
}

/// Simulated adversarial face-anti-spoofing trainer.
#[derive(Debug)]
pub struct SimFas {
    weights: FasConfig,
    seeds: SeedManager,
    d_schedule: LrSchedule,
    g_schedule: LrSchedule,
    loader: FasPrefetcher,
    generator: ParamStore,
    discriminator: ParamStore,
    targets: Option<(ParamStore, ParamStore)>,
    checkpoints: CheckpointManager,
}

impl SimFas {
    pub fn new(config: &TrainConfig) -> Result<Self> {
        let weights = config
            .fas
            .clone()
            .ok_or_else(|| MtlError::training(TASK, 0, "FAS options are not configured"))?;
        let mut seeds = SeedManager::new(config.seed, config.local_rank);
        let schedule = config.lr_schedule();
        let loader = FasPrefetcher {
            rng: seeds.rng("fas.loader"),
            batch_size: batch_len(config),
            pending: None,
        };
        Ok(Self {
            d_schedule: schedule.with_base(weights.d_lr),
            g_schedule: schedule.with_base(weights.g_lr),
            weights,
            seeds,
            loader,
            generator: ParamStore::default(),
            discriminator: ParamStore::default(),
            targets: None,
            checkpoints: CheckpointManager::new(config.checkpoint_dir.clone(), config.max_checkpoints),
        })
    }

    pub fn checkpoint_manager(&self) -> &CheckpointManager {
        &self.checkpoints
    }
}

impl FasTrainer for SimFas {
    type Tensor = SimTensor;
    type Backbone = ParamStore;
    type AgeEstimator = ParamStore;
    type Prefetcher = FasPrefetcher;

    fn set_loader(&mut self) -> Result<()> {
        self.loader.pending = Some(self.loader.load());
        Ok(())
    }

    fn set_model(&mut self) -> Result<()> {
        let generator_layout = [
            ("encoder.weight", vec![EMBED_DIM, FEATURE_DIM]),
            ("decoder.weight", vec![FEATURE_DIM, EMBED_DIM]),
        ];
        let discriminator_layout = [("conv.weight", vec![1, FEATURE_DIM])];

        let mut rng = self.seeds.rng("fas.model");
        self.generator = random_store(&mut rng, &generator_layout, 0.5);
        self.discriminator = random_store(&mut rng, &discriminator_layout, 0.5);

        let mut rng = self.seeds.rng("fas.target");
        self.targets = Some((
            random_store(&mut rng, &generator_layout, 0.1),
            random_store(&mut rng, &discriminator_layout, 0.1),
        ));
        Ok(())
    }

    fn prefetcher(&mut self) -> &mut FasPrefetcher {
        &mut self.loader
    }

    fn train(
        &mut self,
        inputs: FasInputs<'_, ParamStore, ParamStore, SimTensor>,
        iteration: u64,
    ) -> Result<FasLosses> {
        let (generator_target, discriminator_target) = self
            .targets
            .as_ref()
            .ok_or_else(|| uninitialized(TASK, "model"))?;
        if inputs.source_image.len() != inputs.target_image.len() {
            return Err(MtlError::training(
                TASK,
                iteration,
                format!(
                    "source batch has {} values, target batch has {}",
                    inputs.source_image.len(),
                    inputs.target_image.len()
                ),
            ));
        }

        // Small adversarial rates would barely move the toy networks.
        let d_step = self.d_schedule.lr_at(iteration) * 1e3;
        let g_step = self.g_schedule.lr_at(iteration) * 1e3;
        relax(&mut self.discriminator, discriminator_target, d_step, 0.0);
        relax(&mut self.generator, generator_target, g_step, 0.0);

        let g_gap = gap(&self.generator, generator_target);
        let d_gap = gap(&self.discriminator, discriminator_target);
        let domain_shift = (mean(inputs.source_image) - mean(inputs.target_image)).abs();
        let label_shift = (mean(inputs.source_label) - mean(inputs.target_label)).abs();

        let d1_logit = 0.5 + d_gap;
        let d3_logit = 0.5 - d_gap + domain_shift;
        let d_loss = (d1_logit - 1.0).powi(2) + d3_logit.powi(2);
        let g_logit = (0.5 + g_gap) * self.weights.gan_loss_weight;

        Ok(FasLosses {
            d1_logit,
            d3_logit,
            d_loss,
            g_logit,
            fas_id_loss: self.weights.id_loss_weight
                * (inputs.backbone.l2_norm() * g_gap + label_shift * 0.01),
            fas_age_loss: self.weights.age_loss_weight
                * inputs.age_estimator.l2_norm()
                * g_gap
                * 0.1,
        })
    }

    fn checkpoints(&mut self, iteration: u64, last: bool, gate: RankGate) -> Result<()> {
        let mut state = with_prefix(self.generator.state_dict(), "generator");
        state.extend(with_prefix(self.discriminator.state_dict(), "discriminator"));
        self.checkpoints
            .save(TASK, iteration, last, None, &state, gate)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainOptions;
    use crate::sim::SimFr;
    use crate::training::subtrainer::FrTrainer;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> TrainConfig {
        TrainOptions {
            train_fas: true,
            batch_size: 2,
            fas_gan_loss_weight: Some(75.0),
            fas_id_loss_weight: Some(0.002),
            fas_age_loss_weight: Some(10.0),
            checkpoint_dir: dir.path().to_path_buf(),
            ..TrainOptions::default()
        }
        .validate()
        .unwrap()
    }

    #[test]
    fn test_new_requires_fas_section() {
        let cfg = TrainOptions::default().validate().unwrap();
        assert!(SimFas::new(&cfg).is_err());
    }

    #[test]
    fn test_train_consumes_fr_networks() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let mut fr = SimFr::new(&cfg);
        fr.set_loader().unwrap();
        fr.set_model().unwrap();
        let mut fas = SimFas::new(&cfg).unwrap();
        fas.set_loader().unwrap();
        fas.set_model().unwrap();

        let source = fr.prefetcher().next().unwrap();
        let target = fas.prefetcher().next().unwrap();
        let losses = fas
            .train(
                FasInputs {
                    backbone: fr.backbone(),
                    age_estimator: fr.estimation_network(),
                    source_image: &source.image,
                    target_image: &target.image,
                    source_label: &source.label,
                    target_label: &target.label,
                },
                1,
            )
            .unwrap();
        assert!(losses.fas_id_loss > 0.0);
        assert!(losses.fas_age_loss > 0.0);
        assert!(losses.d_loss.is_finite());
    }

    #[test]
    fn test_mismatched_batches_fail() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let mut fas = SimFas::new(&cfg).unwrap();
        fas.set_loader().unwrap();
        fas.set_model().unwrap();
        let store = ParamStore::default();
        let short = vec![0.0; 3];
        let long = vec![0.0; 5];
        let result = fas.train(
            FasInputs {
                backbone: &store,
                age_estimator: &store,
                source_image: &short,
                target_image: &long,
                source_label: &short,
                target_label: &short,
            },
            4,
        );
        assert!(matches!(result, Err(MtlError::Training { iteration: 4, .. })));
    }

    #[test]
    fn test_final_checkpoint_written() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let mut fas = SimFas::new(&cfg).unwrap();
        fas.set_loader().unwrap();
        fas.set_model().unwrap();
        fas.checkpoints(9, true, RankGate::primary()).unwrap();
        let saved = fas.checkpoint_manager().find("fas", 9).unwrap().unwrap();
        let state = fas.checkpoint_manager().load(&saved).unwrap();
        assert!(state.contains_key("generator.encoder.weight"));
        assert!(state.contains_key("discriminator.conv.weight"));
    }
}
