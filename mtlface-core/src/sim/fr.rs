use rand::Rng;
use rand::rngs::StdRng;
use tracing::{info, warn};

use super::{
    EMBED_DIM, FEATURE_DIM, NUM_CLASSES, SimTensor, batch_len, gap, mean, random_store, relax,
    uninitialized, under_prefix, with_prefix,
};
use crate::config::TrainConfig;
use crate::error::Result;
use crate::schedule::LrSchedule;
use crate::training::checkpoint::CheckpointManager;
use crate::training::metrics::FrLosses;
use crate::training::progress::RankGate;
use crate::training::reproducibility::SeedManager;
use crate::training::subtrainer::{FrBatch, FrTrainer, Prefetcher};
use crate::weights::{LoadStateDict, ParamStore, StateDict};

const TASK: &str = "fr";

/// Synthetic FR batches, always holding the next batch ready.
#[derive(Debug)]
pub struct FrPrefetcher {
    rng: StdRng,
    batch_size: usize,
    age_group: u32,
    pending: Option<FrBatch<SimTensor>>,
}

impl FrPrefetcher {
    fn new(rng: StdRng, batch_size: usize, age_group: u32) -> Self {
        Self {
            rng,
            batch_size,
            age_group: age_group.max(1),
            pending: None,
        }
    }

    fn load(&mut self) -> FrBatch<SimTensor> {
        let n = self.batch_size;
        let rng = &mut self.rng;
        FrBatch {
            image: (0..n * FEATURE_DIM).map(|_| rng.r#gen::<f32>()).collect(),
            label: (0..n).map(|_| rng.gen_range(0..NUM_CLASSES) as f32).collect(),
            age: (0..n).map(|_| rng.gen_range(0..self.age_group) as f32).collect(),
            gender: (0..n).map(|_| rng.gen_range(0..2u8) as f32).collect(),
        }
    }

    fn prime(&mut self) {
        self.pending = Some(self.load());
    }
}

impl Prefetcher for FrPrefetcher {
    type Batch = FrBatch<SimTensor>;

    fn next(&mut self) -> Result<Self::Batch> {
        let batch = self
            .pending
            .take()
            .ok_or_else(|| uninitialized(TASK, "data loader"))?;
        self.pending = Some(self.load());
        Ok(batch)
    }
}

/// Simulated face-recognition trainer.
#[derive(Debug)]
pub struct SimFr {
    config: TrainConfig,
    seeds: SeedManager,
    schedule: LrSchedule,
    loader: FrPrefetcher,
    backbone: ParamStore,
    estimation_network: ParamStore,
    head: ParamStore,
    targets: Option<(ParamStore, ParamStore)>,
    checkpoints: CheckpointManager,
    last_losses: Option<FrLosses>,
}

impl SimFr {
    pub fn new(config: &TrainConfig) -> Self {
        let mut seeds = SeedManager::new(config.seed, config.local_rank);
        let loader = FrPrefetcher::new(
            seeds.rng("fr.loader"),
            batch_len(config),
            config.age_group,
        );
        Self {
            config: config.clone(),
            seeds,
            schedule: config.lr_schedule(),
            loader,
            backbone: ParamStore::default(),
            estimation_network: ParamStore::default(),
            head: ParamStore::default(),
            targets: None,
            checkpoints: CheckpointManager::new(config.checkpoint_dir.clone(), config.max_checkpoints),
            last_losses: None,
        }
    }

    pub fn checkpoint_manager(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    fn layouts(&self) -> (Vec<(&'static str, Vec<usize>)>, Vec<(&'static str, Vec<usize>)>) {
        let ages = self.config.age_group.max(1) as usize;
        (
            vec![
                ("conv1.weight", vec![EMBED_DIM, FEATURE_DIM]),
                ("conv1.bias", vec![EMBED_DIM]),
                ("output_layer.weight", vec![EMBED_DIM, EMBED_DIM]),
            ],
            vec![
                ("age_head.weight", vec![ages, EMBED_DIM]),
                ("age_head.bias", vec![ages]),
            ],
        )
    }

    fn full_state(&self) -> StateDict {
        let mut state = with_prefix(self.backbone.state_dict(), "backbone");
        state.extend(with_prefix(self.estimation_network.state_dict(), "estimation_network"));
        state.extend(with_prefix(self.head.state_dict(), "head"));
        state
    }

    fn restore(&mut self) -> Result<()> {
        let restore_iter = self.config.restore_iter;
        if restore_iter == 0 {
            return Ok(());
        }
        let Some(checkpoint) = self.checkpoints.find(TASK, restore_iter)? else {
            warn!(
                restore_iter,
                dir = %self.checkpoints.base_dir().display(),
                "no final FR checkpoint to restore; starting from fresh weights"
            );
            return Ok(());
        };
        let state = self.checkpoints.load(&checkpoint)?;
        self.backbone.load_state_dict(&under_prefix(&state, "backbone"), false)?;
        self.estimation_network
            .load_state_dict(&under_prefix(&state, "estimation_network"), false)?;
        self.head.load_state_dict(&under_prefix(&state, "head"), false)?;
        info!(restore_iter, path = %checkpoint.path.display(), "restored FR weights");
        Ok(())
    }
}

impl FrTrainer for SimFr {
    type Tensor = SimTensor;
    type Backbone = ParamStore;
    type AgeEstimator = ParamStore;
    type Prefetcher = FrPrefetcher;

    fn set_loader(&mut self) -> Result<()> {
        self.loader.prime();
        Ok(())
    }

    fn set_model(&mut self) -> Result<()> {
        let (backbone_layout, age_layout) = self.layouts();
        let head_layout = [("kernel", vec![EMBED_DIM, NUM_CLASSES])];

        let mut rng = self.seeds.rng("fr.model");
        self.backbone = random_store(&mut rng, &backbone_layout, 0.5);
        self.estimation_network = random_store(&mut rng, &age_layout, 0.5);
        self.head = random_store(&mut rng, &head_layout, 0.5);

        let mut rng = self.seeds.rng("fr.target");
        self.targets = Some((
            random_store(&mut rng, &backbone_layout, 0.1),
            random_store(&mut rng, &age_layout, 0.1),
        ));
        self.restore()
    }

    fn prefetcher(&mut self) -> &mut FrPrefetcher {
        &mut self.loader
    }

    fn train(&mut self, inputs: &FrBatch<SimTensor>, iteration: u64) -> Result<FrLosses> {
        let (backbone_target, age_target) = self
            .targets
            .as_ref()
            .ok_or_else(|| uninitialized(TASK, "model"))?;

        let lr = self.schedule.lr_at(iteration);
        let step = lr * (1.0 + self.config.momentum);
        let decay = lr * self.config.weight_decay;
        relax(&mut self.backbone, backbone_target, step, decay);
        relax(&mut self.estimation_network, age_target, step, decay);

        let jitter = (mean(&inputs.image) - 0.5).abs() * 0.01;
        let margin = self.config.head_m * 0.1;
        let losses = FrLosses {
            id: gap(&self.backbone, backbone_target) * self.config.head_s.ln().max(1.0) + margin + jitter,
            da: self.config.fr_da_loss_weight * (mean(&inputs.label) - mean(&inputs.gender)).abs(),
            age: self.config.fr_age_loss_weight
                * (gap(&self.estimation_network, age_target) + mean(&inputs.age) * 0.01),
        };
        self.last_losses = Some(losses);
        Ok(losses)
    }

    fn backbone(&self) -> &ParamStore {
        &self.backbone
    }

    fn backbone_mut(&mut self) -> &mut ParamStore {
        &mut self.backbone
    }

    fn estimation_network(&self) -> &ParamStore {
        &self.estimation_network
    }

    fn estimation_network_mut(&mut self) -> &mut ParamStore {
        &mut self.estimation_network
    }

    fn checkpoints(&mut self, iteration: u64, last: bool, gate: RankGate) -> Result<()> {
        let loss = self.last_losses.map(|l| l.total());
        self.checkpoints
            .save(TASK, iteration, last, loss, &self.full_state(), gate)?;
        Ok(())
    }
}
