// =============================================================================
// Killshot — late-window direction snipe (engine + paper/live trade tracker)
// =============================================================================

pub mod engine;
pub mod tracker;

pub use engine::KillshotEngine;
pub use tracker::{KillTrade, KillTracker};
