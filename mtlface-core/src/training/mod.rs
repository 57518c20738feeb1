//! Training infrastructure: sub-trainer contracts, the orchestrator loop,
//! loss records, checkpoints, seeding and rank gating.

pub mod callbacks;
pub mod checkpoint;
pub mod metrics;
pub mod orchestrator;
pub mod progress;
pub mod reproducibility;
pub mod subtrainer;

pub use callbacks::{BestLossWatermark, CallbackAction};
pub use checkpoint::{Checkpoint, CheckpointManager};
pub use metrics::{FasLosses, FrLosses, LossRecord, LossRow};
pub use orchestrator::{FitReport, MtlFace};
pub use progress::RankGate;
pub use reproducibility::SeedManager;
pub use subtrainer::{Backend, FasBatch, FasInputs, FasTrainer, FrBatch, FrTrainer, Prefetcher};
