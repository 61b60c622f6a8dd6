//! Building, merging and thresholding statistics tables.

pub mod builder;
pub mod merger;
pub mod runner;
pub mod stats;
pub mod threshold;

pub use builder::{LocalBuild, TableBuilder};
pub use merger::{MergeSummary, WindowMerger};
pub use runner::{RunError, RunOptions, RunOutcome, RunStage, Runner};
pub use threshold::{EffectiveThreshold, ThresholdAdvisor, ThresholdPolicy, ThresholdSource};
