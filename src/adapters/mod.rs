//! Boundaries to external collaborators
//!
//! The engine consumes market data and produces to execution, approval and
//! notification channels. Each is a trait so deployments plug in their own
//! broker, pricing service or paging integration.

pub mod approval;
pub mod execution;
pub mod http_prices;
pub mod market_data;
pub mod notifier;
pub mod webhook;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Decision;

pub use approval::ManualApprovalDesk;
pub use execution::DryRunExecution;
pub use http_prices::{HttpPriceFeed, MarketDataConfig};
pub use market_data::StaticPriceFeed;
pub use notifier::LoggingNotifier;
pub use webhook::WebhookNotifier;

/// Point in time a price is requested for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceTime {
    Now,
    At(DateTime<Utc>),
}

/// Typed "no price" answer; a market data source never returns a bare zero
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("price unavailable for {instrument}: {reason}")]
pub struct PriceUnavailable {
    pub instrument: String,
    pub reason: String,
}

impl From<PriceUnavailable> for crate::error::QuorumError {
    fn from(err: PriceUnavailable) -> Self {
        crate::error::QuorumError::DataUnavailable(err.to_string())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn price_at(
        &self,
        instrument: &str,
        at: PriceTime,
    ) -> std::result::Result<Decimal, PriceUnavailable>;
}

/// Broker side. Called only for accepted decisions; no retry or fill tracking here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionVenue: Send + Sync {
    async fn submit(&self, decision: &Decision) -> crate::error::Result<()>;
}

/// Human answer to a pending-approval request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub approved: bool,
    pub approver: String,
    pub reason: String,
}

/// Out-of-band approval channel for decisions stopped by approval rules
#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    async fn request_approval(
        &self,
        decision: &Decision,
        rule_ids: &[String],
    ) -> crate::error::Result<ApprovalResponse>;
}

/// Kind of out-of-band agent flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    LowPerformer,
    Overconfident,
}

impl std::fmt::Display for FlagKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlagKind::LowPerformer => write!(f, "low_performer"),
            FlagKind::Overconfident => write!(f, "overconfident"),
        }
    }
}

/// Fire-and-forget agent notifications
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        agent_id: &str,
        flag: FlagKind,
        details: &str,
    ) -> std::result::Result<(), String>;
}
