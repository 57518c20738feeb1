//! Rank gating and the iteration progress bar.

use indicatif::{ProgressBar, ProgressStyle};
use std::ops::RangeInclusive;

/// Whether this process is the primary rank of a distributed job.
///
/// Passed explicitly to every reporting and checkpoint call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankGate {
    local_rank: u32,
}

impl RankGate {
    pub fn new(local_rank: u32) -> Self {
        Self { local_rank }
    }

    pub fn primary() -> Self {
        Self::new(0)
    }

    pub fn local_rank(&self) -> u32 {
        self.local_rank
    }

    pub fn is_primary(&self) -> bool {
        self.local_rank == 0
    }
}

/// Progress bar over the iteration range; hidden on non-primary ranks.
pub fn iteration_bar(range: &RangeInclusive<u64>, gate: RankGate) -> ProgressBar {
    if !gate.is_primary() {
        return ProgressBar::hidden();
    }
    let len = range.end().saturating_sub(*range.start()).saturating_add(1);
    let pb = ProgressBar::new(if range.is_empty() { 0 } else { len });
    if let Ok(style) = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({eta}) {msg}")
    {
        pb.set_style(style.progress_chars("##-"));
    }
    pb
}
