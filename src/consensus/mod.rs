//! Weighted consensus over a round's votes

pub mod aggregator;

pub use aggregator::{ConsensusAggregator, ConsensusConfig};
