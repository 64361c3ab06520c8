//! Scoring agents
//!
//! Agents implement `ScoringAgent` and are registered once at startup in an
//! `AgentRegistry`. The engine never loads agents at runtime.

pub mod http;
pub mod registry;
pub mod scripted;
pub mod traits;

pub use http::{AgentEndpoint, HttpAgent};
pub use registry::AgentRegistry;
pub use scripted::{Script, ScriptedAgent};
pub use traits::{AgentKind, ScoringAgent};
