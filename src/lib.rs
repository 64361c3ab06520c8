pub mod adapters;
pub mod agents;
pub mod attribution;
pub mod cli;
pub mod collector;
pub mod config;
pub mod consensus;
pub mod domain;
pub mod engine;
pub mod error;
pub mod persistence;
pub mod policy;
pub mod recalibration;
pub mod scheduler;
pub mod shadow;
pub mod snapshot;

pub use agents::{AgentKind, AgentRegistry, ScoringAgent};
pub use config::AppConfig;
pub use engine::{
    DecisionAudit, Disposition, EngineComponents, GovernanceEngine, RoundOutcome, Runtime,
    RuntimeCollaborators,
};
pub use error::{QuorumError, Result};
pub use persistence::{GovernanceStore, InMemoryStore, PostgresStore};
pub use policy::{GateState, PolicyGate, Ruleset, Verdict};
pub use scheduler::Scheduler;
pub use snapshot::{SnapshotCell, Versioned};
