//! Command-line flags.
//!
//! Long names keep the snake_case spelling used by existing launch scripts
//! (`--train_fr`, `--num_iter`). Every training flag is optional here: only
//! flags actually given on the command line are serialized into the override
//! layer, so the config file and `MTLFACE_*` variables still apply below them.

use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// MTLFace: multi-task face recognition and face anti-spoofing training
#[derive(Parser, Debug)]
#[command(name = "mtlface", version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (defaults to ./mtlface.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors to stderr
    #[arg(short, long)]
    pub quiet: bool,

    #[command(flatten)]
    pub train: TrainArgs,
}

#[derive(clap::Args, Serialize, Debug, Default)]
pub struct TrainArgs {
    /// Train face recognition
    #[arg(long = "train_fr")]
    #[serde(skip_serializing_if = "is_false")]
    pub train_fr: bool,

    /// Train the face anti-spoofing adversarial model
    #[arg(long = "train_fas")]
    #[serde(skip_serializing_if = "is_false")]
    pub train_fas: bool,

    #[arg(long = "backbone_name")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backbone_name: Option<String>,

    /// Scale of the margin-based identity head
    #[arg(long = "head_s")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_s: Option<f64>,

    /// Margin of the identity head
    #[arg(long = "head_m")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_m: Option<f64>,

    #[arg(long = "weight_decay")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_decay: Option<f64>,

    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub momentum: Option<f64>,

    #[arg(long = "fr_age_loss_weight")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fr_age_loss_weight: Option<f64>,

    #[arg(long = "fr_da_loss_weight")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fr_da_loss_weight: Option<f64>,

    /// Number of age groups
    #[arg(long = "age_group")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_group: Option<u32>,

    /// Learning-rate decay factor applied at each milestone
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f64>,

    /// Learning-rate milestones, e.g. `--milestone 20 40 60`; a bare
    /// `--milestone` clears them
    #[arg(long, num_args = 0..)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone: Option<Vec<u64>>,

    /// Linear warmup length in iterations
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warmup: Option<u64>,

    #[arg(long = "learning_rate")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning_rate: Option<f64>,

    #[arg(short = 'd', long = "dataset_name")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_name: Option<String>,

    #[arg(long = "image_size")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_size: Option<u32>,

    /// Last iteration to run (inclusive)
    #[arg(long = "num_iter")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_iter: Option<u64>,

    /// Iteration to resume from; training starts at restore_iter + 1
    #[arg(long = "restore_iter")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore_iter: Option<u64>,

    #[arg(long = "batch_size")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,

    /// Run validation hooks every N iterations
    #[arg(long = "val_interval")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub val_interval: Option<u64>,

    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    #[arg(long = "num_worker")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_worker: Option<u32>,

    /// Process rank on this node (falls back to LOCAL_RANK)
    #[arg(long = "local_rank")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_rank: Option<u32>,

    /// Mixed-precision training
    #[arg(long)]
    #[serde(skip_serializing_if = "is_false")]
    pub amp: bool,

    /// Discriminator learning rate
    #[arg(long = "d_lr")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d_lr: Option<f64>,

    /// Generator learning rate
    #[arg(long = "g_lr")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub g_lr: Option<f64>,

    #[arg(long = "fas_gan_loss_weight")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fas_gan_loss_weight: Option<f64>,

    #[arg(long = "fas_id_loss_weight")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fas_id_loss_weight: Option<f64>,

    #[arg(long = "fas_age_loss_weight")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fas_age_loss_weight: Option<f64>,

    /// Pretrained identity backbone (safetensors), loaded when training FAS
    #[arg(long = "id_pretrained_path")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_pretrained_path: Option<PathBuf>,

    /// Pretrained age estimator (safetensors), loaded when training FAS
    #[arg(long = "age_pretrained_path")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_pretrained_path: Option<PathBuf>,

    /// Directory for checkpoints and their manifest
    #[arg(long = "checkpoint_dir")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_dir: Option<PathBuf>,

    /// Checkpoints kept per task in the manifest
    #[arg(long = "max_checkpoints")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_checkpoints: Option<usize>,

    /// Where loss values are written after training
    #[arg(long = "loss_path")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loss_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_snake_case_flags() {
        let cli = Cli::try_parse_from([
            "mtlface",
            "--train_fr",
            "-d",
            "casia",
            "--num_iter",
            "36000",
            "--milestone",
            "10",
            "20",
            "--fr_da_loss_weight",
            "0.002",
        ])
        .unwrap();
        assert!(cli.train.train_fr);
        assert!(!cli.train.train_fas);
        assert_eq!(cli.train.dataset_name.as_deref(), Some("casia"));
        assert_eq!(cli.train.num_iter, Some(36000));
        assert_eq!(cli.train.milestone, Some(vec![10, 20]));
        assert_eq!(cli.train.fr_da_loss_weight, Some(0.002));
    }

    #[test]
    fn test_unset_flags_stay_unset() {
        let cli = Cli::try_parse_from(["mtlface"]).unwrap();
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
        assert!(cli.train.num_iter.is_none());
        assert!(cli.train.local_rank.is_none());
    }

    #[test]
    fn test_verbosity_counts() {
        let cli = Cli::try_parse_from(["mtlface", "-vv", "--train_fas"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.train.train_fas);
    }

    #[test]
    fn test_bare_milestone_means_no_decay() {
        let cli = Cli::try_parse_from(["mtlface", "--milestone", "--train_fr"]).unwrap();
        assert_eq!(cli.train.milestone, Some(vec![]));
        assert!(cli.train.train_fr);

        let opts = mtlface_core::load_options(None, Some(&cli.train)).unwrap();
        assert!(opts.milestone.is_empty());
    }

    #[test]
    fn test_dashed_spelling_rejected() {
        assert!(Cli::try_parse_from(["mtlface", "--train-fr"]).is_err());
    }

    #[test]
    fn test_overrides_layer_over_defaults() {
        let cli = Cli::try_parse_from([
            "mtlface",
            "--train_fas",
            "--fas_gan_loss_weight",
            "75",
            "--restore_iter",
            "3",
        ])
        .unwrap();
        let opts = mtlface_core::load_options(None, Some(&cli.train)).unwrap();
        assert!(opts.train_fas);
        assert!(!opts.train_fr);
        assert_eq!(opts.fas_gan_loss_weight, Some(75.0));
        assert_eq!(opts.restore_iter, 3);
        assert_eq!(opts.head_s, 64.0);
        assert_eq!(opts.milestone, vec![20, 40, 60]);
    }
}
