//! Agent weight recalibration and the published weight table

pub mod recalibrator;
pub mod weight_book;

pub use recalibrator::{
    window_stats, AccuracyTier, AgentFlag, RecalibrationConfig, RecalibrationReport, Recalibrator,
    WeightOutcome,
};
pub use weight_book::{WeightBook, WeightsConfig};
