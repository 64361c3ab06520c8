//! Command handlers behind the `quorum` binary

use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tabled::Tabled;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::output::{
    print_error, print_item, print_items, print_kv, print_success, print_warn, OutputMode,
};
use super::{Cli, Commands, RulesetCommands};
use crate::adapters::{
    DryRunExecution, HttpPriceFeed, LoggingNotifier, ManualApprovalDesk, MarketData, Notifier,
    StaticPriceFeed, WebhookNotifier,
};
use crate::agents::{AgentRegistry, HttpAgent};
use crate::config::AppConfig;
use crate::domain::{AccountState, AgentWeight, RoundContext, ShadowPosition};
use crate::engine::{Disposition, Runtime, RuntimeCollaborators};
use crate::persistence::{GovernanceStore, InMemoryStore, PostgresStore};
use crate::policy::{changelog, Ruleset, RulesetFile, RulesetRecord};

#[derive(Debug, Serialize, Tabled)]
struct WeightRow {
    agent_id: String,
    weight: String,
    accuracy: String,
    samples: String,
    confidence_gap: String,
    updated_at: String,
}

impl From<&AgentWeight> for WeightRow {
    fn from(w: &AgentWeight) -> Self {
        let (accuracy, samples, gap) = match &w.stats {
            Some(s) => (
                s.accuracy.round_dp(4).to_string(),
                s.samples.to_string(),
                s.confidence_gap.round_dp(4).to_string(),
            ),
            None => ("-".into(), "0".into(), "-".into()),
        };
        Self {
            agent_id: w.agent_id.clone(),
            weight: w.weight.round_dp(6).normalize().to_string(),
            accuracy,
            samples,
            confidence_gap: gap,
            updated_at: w.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct ShadowRow {
    id: String,
    instrument: String,
    action: String,
    status: String,
    rejected_by: String,
    entry_price: String,
    matures_at: String,
    outcome: String,
    realized_return: String,
}

impl From<&ShadowPosition> for ShadowRow {
    fn from(p: &ShadowPosition) -> Self {
        let opt = |d: Option<rust_decimal::Decimal>| d.map(|v| v.to_string()).unwrap_or_else(|| "-".into());
        Self {
            id: p.id.to_string(),
            instrument: p.instrument.clone(),
            action: p.action.to_string(),
            status: p.status.to_string(),
            rejected_by: p.rejected_by.join(","),
            entry_price: opt(p.entry_price),
            matures_at: p.matures_at.to_rfc3339(),
            outcome: p
                .outcome
                .map(|o| format!("{:?}", o))
                .unwrap_or_else(|| "-".into()),
            realized_return: opt(p.realized_return),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct RulesetRow {
    version: u64,
    hash: String,
    authorizer: String,
    reason: String,
    changes: usize,
    recorded_at: String,
}

impl From<&RulesetRecord> for RulesetRow {
    fn from(r: &RulesetRecord) -> Self {
        Self {
            version: r.version,
            hash: r.content_hash.chars().take(16).collect(),
            authorizer: r.authorizer.clone(),
            reason: r.reason.clone(),
            changes: r.changelog.len(),
            recorded_at: r.recorded_at.to_rfc3339(),
        }
    }
}

pub async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn GovernanceStore>> {
    match &config.database.url {
        Some(url) => {
            let store = PostgresStore::new(url, config.database.max_connections)
                .await
                .context("connecting to governance database")?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("database.url not set; governance records are kept in memory only");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

pub fn build_registry(config: &AppConfig) -> anyhow::Result<AgentRegistry> {
    let mut registry = AgentRegistry::new();
    for endpoint in &config.agents {
        registry.register(Arc::new(HttpAgent::new(endpoint)?))?;
    }
    if registry.is_empty() {
        warn!("no agents configured; rounds will fail with NoQuorum");
    }
    Ok(registry)
}

fn collaborators(config: &AppConfig) -> anyhow::Result<RuntimeCollaborators> {
    let market: Arc<dyn MarketData> = match &config.market_data.url {
        Some(url) => Arc::new(HttpPriceFeed::new(
            url,
            std::time::Duration::from_millis(config.market_data.timeout_ms),
        )?),
        None => {
            warn!("market_data.url not set; shadow positions cannot be priced");
            Arc::new(StaticPriceFeed::new())
        }
    };
    let notifier: Arc<dyn Notifier> = match WebhookNotifier::from_env() {
        Some(webhook) => webhook,
        None => Arc::new(LoggingNotifier),
    };
    Ok(RuntimeCollaborators {
        market,
        execution: Arc::new(DryRunExecution::new()),
        approvals: Arc::new(ManualApprovalDesk::new()),
        notifier,
    })
}

async fn build_runtime(config: &AppConfig) -> anyhow::Result<Runtime> {
    let store = open_store(config).await?;
    let registry = build_registry(config)?;
    let runtime = Runtime::build(config, store, registry, collaborators(config)?).await?;
    if let Some(reason) = runtime.engine.gate().frozen_reason() {
        print_error(&format!("policy gate is FROZEN: {}", reason));
    }
    Ok(runtime)
}

pub async fn run(cli: Cli, shutdown: impl std::future::Future<Output = ()>) -> anyhow::Result<()> {
    let mut config = AppConfig::load_from(&cli.config_dir)
        .with_context(|| format!("loading configuration from {}", cli.config_dir.display()))?;
    let mode = OutputMode::from_json_flag(cli.json);

    match &cli.command {
        Commands::CheckConfig => {
            return match config.validate() {
                Ok(()) => {
                    print_success("configuration is valid");
                    Ok(())
                }
                Err(errors) => {
                    for e in &errors {
                        print_error(e);
                    }
                    anyhow::bail!("{} configuration problem(s)", errors.len())
                }
            };
        }
        Commands::Ruleset(RulesetCommands::Hash { file, version }) => {
            let raw = tokio::fs::read_to_string(file).await?;
            let ruleset = Ruleset::new(*version, RulesetFile::parse(&raw)?)?;
            print_kv("version", &ruleset.version().to_string());
            print_kv("rules", &ruleset.rules().len().to_string());
            print_kv("sha256", ruleset.content_hash());
            return Ok(());
        }
        Commands::Ruleset(RulesetCommands::Amend {
            enable_amendment: true,
            ..
        }) => config.policy.amendment_mode = true,
        _ => {}
    }

    let runtime = build_runtime(&config).await?;
    let engine = &runtime.engine;

    match cli.command {
        Commands::Serve => {
            let (tx, rx) = broadcast::channel(1);
            let jobs = runtime.scheduler.clone().start(rx);
            info!("quorum serving; press Ctrl+C to stop");
            shutdown.await;
            let _ = tx.send(());
            jobs.await?;
        }
        Commands::Round {
            instrument,
            notional,
            capital,
            cash,
            drawdown,
            positions,
        } => {
            let mut account = AccountState::new(capital, cash);
            account.drawdown = drawdown;
            for (held_instrument, held) in positions {
                account = account.with_position(&held_instrument, held);
            }
            let outcome = engine
                .run_round(RoundContext::new(instrument, notional), &account)
                .await?;
            print_item(&outcome)?;
            if let Disposition::PendingApproval { .. } = outcome.disposition {
                print_warn("decision is waiting for human approval");
            }
        }
        Commands::Settle {
            decision_id,
            realized_return,
        } => {
            let settlement = engine
                .record_settlement(decision_id, realized_return, Utc::now())
                .await?;
            print_item(&settlement)?;
        }
        Commands::Explain { decision_id } => {
            print_item(&engine.explain(decision_id).await?)?;
        }
        Commands::Ruleset(RulesetCommands::Verify) => {
            let gate = engine.gate();
            let ruleset = gate.ruleset()?;
            print_success("ruleset integrity verified");
            print_kv("version", &ruleset.version().to_string());
            print_kv("sha256", ruleset.content_hash());
            print_kv("state", &format!("{:?}", gate.state()));
        }
        Commands::Ruleset(RulesetCommands::Amend {
            file,
            reason,
            authorizer,
            ..
        }) => {
            let raw = tokio::fs::read_to_string(&file).await?;
            let rules = RulesetFile::parse(&raw)?;
            let current = engine.gate().ruleset()?;
            for line in changelog(current.rules(), &rules) {
                print_kv("change", &line);
            }
            let amended = engine.gate().amend(rules, &reason, &authorizer).await?;
            print_success(&format!(
                "ruleset v{} published ({})",
                amended.version(),
                amended.content_hash()
            ));
        }
        Commands::Ruleset(RulesetCommands::History { limit }) => {
            let rows: Vec<RulesetRow> = engine
                .gate()
                .history(limit)
                .await?
                .iter()
                .map(RulesetRow::from)
                .collect();
            print_items(&rows, mode)?;
        }
        Commands::Weights { agent, limit } => {
            let weights = match agent {
                Some(agent_id) => engine.weights().history(&agent_id, limit).await?,
                None => runtime.store.current_weights().await?,
            };
            let rows: Vec<WeightRow> = weights.iter().map(WeightRow::from).collect();
            print_items(&rows, mode)?;
        }
        Commands::Shadows { status, limit } => {
            let rows: Vec<ShadowRow> = runtime
                .store
                .shadows_by_status(status, limit)
                .await?
                .iter()
                .map(ShadowRow::from)
                .collect();
            print_items(&rows, mode)?;
        }
        Commands::Sweep => match runtime.scheduler.run_sweep(Utc::now()).await? {
            Some(report) => print_item(&report)?,
            None => print_warn("another sweep holds the lease; skipped"),
        },
        Commands::Recalibrate => {
            let window = config.scheduler.recalibration_window(Utc::now());
            match runtime.scheduler.run_recalibration(window).await? {
                Some(report) => print_item(&report)?,
                None => print_warn("another recalibration holds the lease; skipped"),
            }
        }
        Commands::CheckConfig | Commands::Ruleset(RulesetCommands::Hash { .. }) => {}
    }

    Ok(())
}
