//! ScoringAgent trait: the one capability the engine consumes from agents
//!
//! An agent is a black box: it is handed the round context and answers with
//! an action, a confidence and an opaque factor payload. The collector owns
//! timeouts and error capture, so implementations may simply fail.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{AgentScore, RoundContext};
use crate::error::Result;

/// Closed set of agent families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Technical,
    Risk,
    Macro,
    InstitutionalFlow,
    NewsSentiment,
    Fundamental,
    Sector,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Technical => "technical",
            AgentKind::Risk => "risk",
            AgentKind::Macro => "macro",
            AgentKind::InstitutionalFlow => "institutional_flow",
            AgentKind::NewsSentiment => "news_sentiment",
            AgentKind::Fundamental => "fundamental",
            AgentKind::Sector => "sector",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScoringAgent: Send + Sync + 'static {
    /// Stable identifier; keys the agent's weight and performance history
    fn id(&self) -> &str;

    fn kind(&self) -> AgentKind;

    /// Score the round's instrument
    async fn score(&self, ctx: &RoundContext) -> Result<AgentScore>;
}
