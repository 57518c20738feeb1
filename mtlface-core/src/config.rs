//! Training options and their validated form.
//!
//! Uses `figment` for layered configuration: defaults -> TOML file ->
//! environment -> explicit command-line flags. The raw [`TrainOptions`]
//! mirror the command-line surface one field per flag; [`TrainOptions::validate`]
//! turns them into an immutable [`TrainConfig`] shared by both sub-trainers.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::schedule::LrSchedule;
use crate::training::progress::RankGate;

/// Workspace-level config file picked up when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "mtlface.toml";

/// Raw training options, one field per command-line flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainOptions {
    pub train_fr: bool,
    pub train_fas: bool,

    // Backbone and margin head.
    pub backbone_name: Option<String>,
    pub head_s: f64,
    pub head_m: f64,

    // Optimizer.
    pub weight_decay: f64,
    pub momentum: f64,

    // FR losses.
    pub fr_age_loss_weight: f64,
    pub fr_da_loss_weight: f64,
    pub age_group: u32,

    // Learning rate.
    pub gamma: f64,
    pub milestone: Vec<u64>,
    pub warmup: u64,
    pub learning_rate: f64,

    // Training.
    pub dataset_name: Option<String>,
    pub image_size: u32,
    pub num_iter: u64,
    pub restore_iter: u64,
    pub batch_size: u32,
    pub val_interval: u64,
    pub seed: u64,
    pub num_worker: u32,
    pub local_rank: u32,
    pub amp: bool,

    // FAS.
    pub d_lr: f64,
    pub g_lr: f64,
    pub fas_gan_loss_weight: Option<f64>,
    pub fas_id_loss_weight: Option<f64>,
    pub fas_age_loss_weight: Option<f64>,
    pub id_pretrained_path: Option<PathBuf>,
    pub age_pretrained_path: Option<PathBuf>,

    // Outputs.
    pub checkpoint_dir: PathBuf,
    pub max_checkpoints: usize,
    pub loss_path: PathBuf,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            train_fr: false,
            train_fas: false,
            backbone_name: None,
            head_s: 64.0,
            head_m: 0.35,
            weight_decay: 5e-4,
            momentum: 0.9,
            fr_age_loss_weight: 0.0,
            fr_da_loss_weight: 0.0,
            age_group: 7,
            gamma: 0.1,
            milestone: vec![20, 40, 60],
            warmup: 5,
            learning_rate: 0.1,
            dataset_name: None,
            image_size: 224,
            num_iter: 125,
            restore_iter: 0,
            batch_size: 0,
            val_interval: 1000,
            seed: 1,
            num_worker: 32,
            local_rank: 0,
            amp: false,
            d_lr: 1e-4,
            g_lr: 1e-4,
            fas_gan_loss_weight: None,
            fas_id_loss_weight: None,
            fas_age_loss_weight: None,
            id_pretrained_path: None,
            age_pretrained_path: None,
            checkpoint_dir: PathBuf::from("checkpoints"),
            max_checkpoints: 5,
            loss_path: PathBuf::from("./loss.csv"),
        }
    }
}

impl TrainOptions {
    /// Validate the raw options into an immutable [`TrainConfig`].
    ///
    /// FAS loss weights are required whenever `train_fas` is set.
    pub fn validate(self) -> Result<TrainConfig, ConfigError> {
        if self.restore_iter > self.num_iter {
            return Err(ConfigError::InvalidIterRange {
                restore_iter: self.restore_iter,
                num_iter: self.num_iter,
            });
        }
        if self.val_interval == 0 {
            return Err(ConfigError::InvalidValInterval);
        }

        let fas = if self.train_fas {
            Some(FasConfig {
                d_lr: self.d_lr,
                g_lr: self.g_lr,
                gan_loss_weight: require(self.fas_gan_loss_weight, "fas_gan_loss_weight")?,
                id_loss_weight: require(self.fas_id_loss_weight, "fas_id_loss_weight")?,
                age_loss_weight: require(self.fas_age_loss_weight, "fas_age_loss_weight")?,
                id_pretrained_path: self.id_pretrained_path,
                age_pretrained_path: self.age_pretrained_path,
            })
        } else {
            None
        };

        if !self.train_fr && !self.train_fas {
            tracing::warn!("neither --train_fr nor --train_fas is set; the run will only drain FR batches");
        }

        Ok(TrainConfig {
            train_fr: self.train_fr,
            backbone_name: self.backbone_name,
            head_s: self.head_s,
            head_m: self.head_m,
            weight_decay: self.weight_decay,
            momentum: self.momentum,
            fr_age_loss_weight: self.fr_age_loss_weight,
            fr_da_loss_weight: self.fr_da_loss_weight,
            age_group: self.age_group,
            gamma: self.gamma,
            milestones: self.milestone,
            warmup: self.warmup,
            learning_rate: self.learning_rate,
            dataset_name: self.dataset_name,
            image_size: self.image_size,
            num_iter: self.num_iter,
            restore_iter: self.restore_iter,
            batch_size: self.batch_size,
            val_interval: self.val_interval,
            seed: self.seed,
            num_worker: self.num_worker,
            local_rank: self.local_rank,
            amp: self.amp,
            fas,
            checkpoint_dir: self.checkpoint_dir,
            max_checkpoints: self.max_checkpoints,
            loss_path: self.loss_path,
        })
    }
}

fn require(value: Option<f64>, name: &'static str) -> Result<f64, ConfigError> {
    value.ok_or(ConfigError::MissingFasWeight { name })
}

/// FAS hyperparameters; present in [`TrainConfig`] only when FAS training is enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FasConfig {
    pub d_lr: f64,
    pub g_lr: f64,
    pub gan_loss_weight: f64,
    pub id_loss_weight: f64,
    pub age_loss_weight: f64,
    pub id_pretrained_path: Option<PathBuf>,
    pub age_pretrained_path: Option<PathBuf>,
}

/// Validated, immutable training configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub train_fr: bool,
    pub backbone_name: Option<String>,
    pub head_s: f64,
    pub head_m: f64,
    pub weight_decay: f64,
    pub momentum: f64,
    pub fr_age_loss_weight: f64,
    pub fr_da_loss_weight: f64,
    pub age_group: u32,
    pub gamma: f64,
    pub milestones: Vec<u64>,
    pub warmup: u64,
    pub learning_rate: f64,
    pub dataset_name: Option<String>,
    pub image_size: u32,
    pub num_iter: u64,
    pub restore_iter: u64,
    pub batch_size: u32,
    pub val_interval: u64,
    pub seed: u64,
    pub num_worker: u32,
    pub local_rank: u32,
    pub amp: bool,
    pub fas: Option<FasConfig>,
    pub checkpoint_dir: PathBuf,
    pub max_checkpoints: usize,
    pub loss_path: PathBuf,
}

impl TrainConfig {
    pub fn train_fas(&self) -> bool {
        self.fas.is_some()
    }

    /// Global optimizer steps executed by this run, both ends inclusive.
    pub fn iterations(&self) -> RangeInclusive<u64> {
        match self.restore_iter.checked_add(1) {
            Some(start) => start..=self.num_iter,
            // restore_iter == num_iter == u64::MAX
            None => RangeInclusive::new(1, 0),
        }
    }

    pub fn iteration_count(&self) -> u64 {
        self.num_iter - self.restore_iter
    }

    pub fn rank_gate(&self) -> RankGate {
        RankGate::new(self.local_rank)
    }

    /// FR learning-rate schedule.
    pub fn lr_schedule(&self) -> LrSchedule {
        LrSchedule::new(
            self.learning_rate,
            self.gamma,
            self.milestones.clone(),
            self.warmup,
        )
    }
}

/// Load training options by layering defaults, a TOML file, the environment
/// and explicit overrides.
///
/// `config_file` falls back to `./mtlface.toml` when it exists. Environment
/// variables use the `MTLFACE_` prefix (`MTLFACE_NUM_ITER=36000`); the bare
/// `LOCAL_RANK` set by distributed launchers is honored below them.
pub fn load_options<T: Serialize>(
    config_file: Option<&Path>,
    overrides: Option<&T>,
) -> Result<TrainOptions, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(TrainOptions::default()));

    match config_file {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::Load(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }
        None => {
            let default_file = Path::new(DEFAULT_CONFIG_FILE);
            if default_file.exists() {
                figment = figment.merge(Toml::file(default_file));
            }
        }
    }

    figment = figment
        .merge(Env::raw().only(&["local_rank"]))
        .merge(Env::prefixed("MTLFACE_"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    Ok(figment.extract()?)
}
