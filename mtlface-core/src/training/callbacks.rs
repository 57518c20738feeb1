//! Training callbacks: best-loss checkpoint trigger.

/// Action a callback can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Checkpoint,
}

/// Initial watermark value; any finite summed loss below it triggers a save.
pub const WATERMARK_SENTINEL: f64 = 100_000_000.0;

/// Lowest summed FR loss seen so far in this run.
///
/// Lives in the training loop's local state and is not persisted across runs.
#[derive(Debug, Clone)]
pub struct BestLossWatermark {
    best: f64,
    updates: usize,
}

impl Default for BestLossWatermark {
    fn default() -> Self {
        Self::new()
    }
}

impl BestLossWatermark {
    pub fn new() -> Self {
        Self {
            best: WATERMARK_SENTINEL,
            updates: 0,
        }
    }

    /// Record a summed loss. Strictly lower values move the watermark and
    /// request a non-final checkpoint; NaN never does.
    pub fn observe(&mut self, total: f64) -> CallbackAction {
        if total < self.best {
            self.best = total;
            self.updates += 1;
            CallbackAction::Checkpoint
        } else {
            CallbackAction::Continue
        }
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn updates(&self) -> usize {
        self.updates
    }
}
