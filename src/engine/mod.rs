//! Queue engine: claiming, step tracking and periodic reaping.
//!
//! Workers call [`Claimer::take`], do the work, then report through
//! [`StepTracker`]. A [`Reaper`] runs alongside, expunging old finished
//! items and recovering items whose worker vanished.

pub mod claim;
pub mod reaper;
pub mod step;

pub use claim::{Claimer, DEFAULT_BATCH_SIZE};
pub use reaper::{Reaper, ReaperConfig, SweepReport};
pub use step::StepTracker;
