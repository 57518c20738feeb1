//! Checkpoint management for training runs.
//!
//! Non-final saves overwrite `<dir>/<task>/best.safetensors`; final saves go
//! to `<dir>/<task>/iter_<n>.safetensors`. The task's `checkpoints.json`
//! manifest holds one entry for the current best file plus the newest
//! `max_checkpoints` final entries. Final files outlive their manifest entry,
//! and [`CheckpointManager::find`] still resolves them from disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::{MtlError, Result};
use crate::persistence;
use crate::training::progress::RankGate;
use crate::weights::{self, StateDict};

const MANIFEST: &str = "checkpoints.json";

/// A saved checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub task: String,
    pub iteration: u64,
    pub last: bool,
    pub loss: Option<f64>,
    pub path: PathBuf,
    pub hash: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Checkpoint manager.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    base_dir: PathBuf,
    max_checkpoints: usize,
}

impl CheckpointManager {
    pub fn new(base_dir: PathBuf, max_checkpoints: usize) -> Self {
        Self {
            base_dir,
            max_checkpoints: max_checkpoints.max(1),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// List checkpoints for a task, oldest first.
    pub fn list(&self, task: &str) -> Result<Vec<Checkpoint>> {
        let manifest = self.base_dir.join(task).join(MANIFEST);
        Ok(persistence::read_manifest(&manifest)?.unwrap_or_default())
    }

    /// The checkpoint with the lowest recorded loss.
    pub fn best(&self, task: &str) -> Result<Option<Checkpoint>> {
        let checkpoints = self.list(task)?;
        Ok(checkpoints
            .into_iter()
            .filter(|c| c.loss.is_some())
            .min_by(|a, b| {
                a.loss
                    .partial_cmp(&b.loss)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }))
    }

    /// The final checkpoint saved at `iteration`, used to resume a run.
    ///
    /// Falls back to `iter_<n>.safetensors` on disk when the manifest entry
    /// has been trimmed.
    pub fn find(&self, task: &str, iteration: u64) -> Result<Option<Checkpoint>> {
        if let Some(found) = self
            .list(task)?
            .into_iter()
            .rev()
            .find(|c| c.last && c.iteration == iteration)
        {
            return Ok(Some(found));
        }

        let path = self.final_path(task, iteration);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        let created_at = std::fs::metadata(&path)?
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        tracing::debug!(task, iteration, path = %path.display(), "final checkpoint found outside manifest");
        Ok(Some(Checkpoint {
            id: uuid::Uuid::new_v4().to_string(),
            task: task.to_string(),
            iteration,
            last: true,
            loss: None,
            hash: format!("{:x}", Sha256::digest(&bytes)),
            size_bytes: bytes.len() as u64,
            path,
            created_at,
        }))
    }

    fn final_path(&self, task: &str, iteration: u64) -> PathBuf {
        self.base_dir
            .join(task)
            .join(format!("iter_{iteration}.safetensors"))
    }

    /// Load the weights of a checkpoint.
    pub fn load(&self, checkpoint: &Checkpoint) -> Result<StateDict> {
        if !checkpoint.path.exists() {
            return Err(MtlError::not_found(format!(
                "checkpoint file {}",
                checkpoint.path.display()
            )));
        }
        weights::load_network(&checkpoint.path)
    }

    /// Save `state` for `task` at `iteration`.
    ///
    /// Only the primary rank writes; other ranks get `Ok(None)`.
    pub fn save(
        &self,
        task: &str,
        iteration: u64,
        last: bool,
        loss: Option<f64>,
        state: &StateDict,
        gate: RankGate,
    ) -> Result<Option<Checkpoint>> {
        if !gate.is_primary() {
            return Ok(None);
        }

        let dir = self.base_dir.join(task);
        let path = if last {
            self.final_path(task, iteration)
        } else {
            dir.join("best.safetensors")
        };

        let bytes = weights::serialize_network(state)?;
        persistence::write_atomic(&path, &bytes)?;

        let hash = format!("{:x}", Sha256::digest(&bytes));
        let checkpoint = Checkpoint {
            id: uuid::Uuid::new_v4().to_string(),
            task: task.to_string(),
            iteration,
            last,
            loss,
            path,
            hash,
            size_bytes: bytes.len() as u64,
            created_at: Utc::now(),
        };

        let mut checkpoints = self.list(task)?;
        if last {
            // A re-run may save the same final iteration again.
            checkpoints.retain(|c| !(c.last && c.iteration == iteration));
        } else {
            // best.safetensors was just overwritten.
            checkpoints.retain(|c| c.last);
        }
        checkpoints.push(checkpoint.clone());

        let finals = checkpoints.iter().filter(|c| c.last).count();
        let mut excess = finals.saturating_sub(self.max_checkpoints);
        checkpoints.retain(|c| {
            if c.last && excess > 0 {
                excess -= 1;
                false
            } else {
                true
            }
        });
        persistence::write_manifest(&dir.join(MANIFEST), &checkpoints)?;

        tracing::info!(
            task,
            iteration,
            last,
            path = %checkpoint.path.display(),
            "checkpoint saved"
        );
        Ok(Some(checkpoint))
    }
}
