//! Agent that replays a configured answer
//!
//! Used for dry runs, replaying recorded rounds and exercising the collector's
//! failure handling.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::traits::{AgentKind, ScoringAgent};
use crate::domain::{Action, AgentScore, RoundContext};
use crate::error::{QuorumError, Result};

#[derive(Debug, Clone)]
pub enum Script {
    Answer(AgentScore),
    /// Answer after sleeping
    Slow(Duration, AgentScore),
    Fail(String),
    Panic,
}

#[derive(Clone)]
pub struct ScriptedAgent {
    id: String,
    kind: AgentKind,
    script: Arc<RwLock<Script>>,
}

impl ScriptedAgent {
    pub fn new(id: &str, kind: AgentKind, script: Script) -> Self {
        Self {
            id: id.to_string(),
            kind,
            script: Arc::new(RwLock::new(script)),
        }
    }

    pub fn voting(id: &str, kind: AgentKind, action: Action, confidence: Decimal) -> Self {
        Self::new(
            id,
            kind,
            Script::Answer(AgentScore::new(action, confidence, "scripted")),
        )
    }

    /// Change the answer for subsequent rounds
    pub async fn set_script(&self, script: Script) {
        *self.script.write().await = script;
    }
}

#[async_trait]
impl ScoringAgent for ScriptedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        self.kind
    }

    async fn score(&self, _ctx: &RoundContext) -> Result<AgentScore> {
        let script = self.script.read().await.clone();
        match script {
            Script::Answer(score) => Ok(score),
            Script::Slow(delay, score) => {
                tokio::time::sleep(delay).await;
                Ok(score)
            }
            Script::Fail(reason) => Err(QuorumError::Internal(reason)),
            Script::Panic => panic!("scripted agent {} panicked", self.id),
        }
    }
}
