//! Agents served over HTTP
//!
//! The round context is POSTed as JSON; the agent answers with an
//! `AgentScore` body. Timeouts belong to the collector, not to this client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::traits::{AgentKind, ScoringAgent};
use crate::domain::{AgentScore, RoundContext};
use crate::error::{QuorumError, Result};

/// One remote agent as listed in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEndpoint {
    pub id: String,
    pub kind: AgentKind,
    pub url: String,
}

pub struct HttpAgent {
    id: String,
    kind: AgentKind,
    url: String,
    http: Client,
}

impl HttpAgent {
    pub fn new(endpoint: &AgentEndpoint) -> Result<Self> {
        let http = Client::builder()
            .user_agent("quorum-agent-client/0.1")
            .build()
            .map_err(|e| QuorumError::Internal(format!("failed to build agent HTTP client: {}", e)))?;
        Ok(Self {
            id: endpoint.id.clone(),
            kind: endpoint.kind,
            url: endpoint.url.trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl ScoringAgent for HttpAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        self.kind
    }

    async fn score(&self, ctx: &RoundContext) -> Result<AgentScore> {
        let resp = self.http.post(&self.url).json(ctx).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(QuorumError::Validation(format!(
                "agent {} answered HTTP {}: {}",
                self.id, status, text
            )));
        }
        debug!(agent_id = %self.id, round_id = %ctx.round_id, "agent answered");
        Ok(serde_json::from_str(&text)?)
    }
}
