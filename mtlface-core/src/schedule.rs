//! Learning-rate schedule: linear warmup followed by multi-step decay.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LrSchedule {
    pub base_lr: f64,
    pub gamma: f64,
    pub milestones: Vec<u64>,
    pub warmup: u64,
}

impl LrSchedule {
    pub fn new(base_lr: f64, gamma: f64, mut milestones: Vec<u64>, warmup: u64) -> Self {
        milestones.sort_unstable();
        Self {
            base_lr,
            gamma,
            milestones,
            warmup,
        }
    }

    /// Same milestones and warmup, different base rate (used for `d_lr`/`g_lr`).
    pub fn with_base(&self, base_lr: f64) -> Self {
        Self {
            base_lr,
            ..self.clone()
        }
    }

    /// Learning rate at a 1-based global iteration.
    pub fn lr_at(&self, iteration: u64) -> f64 {
        let decays = self.milestones.iter().filter(|&&m| iteration >= m).count();
        let lr = self.base_lr * self.gamma.powi(decays as i32);
        if self.warmup > 0 && iteration <= self.warmup {
            lr * iteration as f64 / self.warmup as f64
        } else {
            lr
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_warmup_ramps_linearly() {
        let s = LrSchedule::new(0.1, 0.1, vec![20000, 23000], 1000);
        assert!(close(s.lr_at(1), 0.1 / 1000.0));
        assert!(close(s.lr_at(500), 0.05));
        assert!(close(s.lr_at(1000), 0.1));
        assert!(close(s.lr_at(1001), 0.1));
    }

    #[test]
    fn test_milestones_decay() {
        let s = LrSchedule::new(0.1, 0.1, vec![23000, 20000], 0);
        assert!(close(s.lr_at(19999), 0.1));
        assert!(close(s.lr_at(20000), 0.01));
        assert!(close(s.lr_at(23000), 0.001));
    }

    #[test]
    fn test_with_base_keeps_shape() {
        let s = LrSchedule::new(0.1, 0.5, vec![10], 0).with_base(1e-4);
        assert!(close(s.lr_at(10), 5e-5));
    }
}
