//! Quorum CLI
//!
//! Commands:
//! - `quorum serve` - run the sweep and recalibration jobs
//! - `quorum round` - run one decision round
//! - `quorum ruleset` - verify, hash, amend and list policy rulesets
//! - `quorum explain | weights | shadows` - inspect recorded state

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;
use uuid::Uuid;

use crate::domain::ShadowStatus;

/// Governance consensus engine for multi-agent trading decisions
#[derive(Parser, Debug)]
#[command(name = "quorum")]
#[command(author, version, about = "Weighted multi-agent consensus behind a tamper-evident policy gate")]
pub struct Cli {
    /// Configuration directory
    #[arg(long, global = true, default_value = "config", env = "QUORUM_CONFIG_DIR")]
    pub config_dir: PathBuf,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the background jobs until interrupted
    Serve,

    /// Run one decision round against the configured agents
    Round {
        #[arg(long)]
        instrument: String,
        /// Proposed order size in account currency
        #[arg(long)]
        notional: Decimal,
        /// Total account equity
        #[arg(long)]
        capital: Decimal,
        /// Uninvested cash
        #[arg(long)]
        cash: Decimal,
        #[arg(long, default_value = "0")]
        drawdown: Decimal,
        /// Existing holding as INSTRUMENT=NOTIONAL; repeatable
        #[arg(long = "position", value_parser = parse_position)]
        positions: Vec<(String, Decimal)>,
    },

    /// Record the realized return of a submitted decision
    Settle {
        decision_id: Uuid,
        /// Return in the decision's direction (0.03 = +3%)
        realized_return: Decimal,
    },

    /// Show votes, states and shadow position of a decision
    Explain { decision_id: Uuid },

    /// Policy ruleset management
    #[command(subcommand)]
    Ruleset(RulesetCommands),

    /// Current agent weights, or one agent's weight history
    Weights {
        #[arg(long)]
        agent: Option<String>,
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// List shadow positions
    Shadows {
        #[arg(long, default_value = "open")]
        status: ShadowStatus,
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Run one maturity sweep now
    Sweep,

    /// Attribute and recalibrate the current window now
    Recalibrate,

    /// Validate configuration and exit
    CheckConfig,
}

#[derive(Subcommand, Debug)]
pub enum RulesetCommands {
    /// Verify the integrity of the active ruleset
    Verify,

    /// Print the canonical hash of a ruleset file
    Hash {
        file: PathBuf,
        #[arg(long, default_value = "1")]
        version: u64,
    },

    /// Publish a new ruleset version from a file
    Amend {
        file: PathBuf,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        authorizer: String,
        /// Start the gate in amendment mode for this command
        #[arg(long)]
        enable_amendment: bool,
    },

    /// Show recorded ruleset versions, newest first
    History {
        #[arg(long, default_value = "10")]
        limit: usize,
    },
}

fn parse_position(raw: &str) -> Result<(String, Decimal), String> {
    let (instrument, notional) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected INSTRUMENT=NOTIONAL, got '{}'", raw))?;
    let notional: Decimal = notional
        .trim()
        .parse()
        .map_err(|e| format!("bad notional in '{}': {}", raw, e))?;
    Ok((instrument.trim().to_string(), notional))
}
