//! Counterfactual (shadow) positions for rejected decisions

pub mod tracker;

pub use tracker::{classify, directional_return, CounterfactualTracker, ShadowConfig, SweepReport};
