//! Vote collection
//!
//! One concurrent task per registered agent, joined against a single round
//! deadline. Anything that goes wrong with an agent becomes an abstention.

pub mod vote_collector;

pub use vote_collector::{CollectorConfig, VoteCollector};
