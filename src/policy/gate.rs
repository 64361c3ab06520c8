//! Policy Gate
//!
//! Lifecycle:
//! - `load` → integrity verified → serving
//! - `load` → integrity failed → frozen (sticky until the process restarts)
//!
//! While serving, `evaluate` runs every rule of the active ruleset against a
//! decision and collects all hits. Amendments publish a new ruleset version
//! and are only accepted when the gate was started in amendment mode.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::rules::{PolicyRule, RuleCategory};
use super::ruleset::{Ruleset, RulesetRecord};
use crate::domain::{AccountState, Decision, RuleViolation};
use crate::error::{QuorumError, Result};
use crate::persistence::GovernanceStore;
use crate::snapshot::SnapshotCell;

/// Policy gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Accept `amend` calls. Off in normal serving.
    #[serde(default)]
    pub amendment_mode: bool,
    /// TOML ruleset used as version 1 when the ruleset log is empty
    #[serde(default)]
    pub genesis_file: Option<String>,
    /// Recorded as the authorizer of the genesis version
    #[serde(default = "default_genesis_authorizer")]
    pub genesis_authorizer: String,
}

fn default_genesis_authorizer() -> String {
    "genesis".to_string()
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            amendment_mode: false,
            genesis_file: None,
            genesis_authorizer: default_genesis_authorizer(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Serving,
    Amending,
    Frozen,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Accept,
    Reject {
        violations: Vec<RuleViolation>,
        /// Approval rules that also hit; kept for the record
        approval_rule_ids: Vec<String>,
    },
    PendingApproval {
        rule_ids: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub ruleset_version: u64,
    pub verdict: Verdict,
}

pub struct PolicyGate {
    store: Arc<dyn GovernanceStore>,
    active: SnapshotCell<Option<Arc<Ruleset>>>,
    frozen: OnceLock<String>,
    amendment_mode: AtomicBool,
    amend_lock: Mutex<()>,
}

impl PolicyGate {
    /// Load and verify the active ruleset.
    ///
    /// A failed verification does not return an error: the gate comes up
    /// frozen and every evaluation reports the violation.
    pub async fn load(
        store: Arc<dyn GovernanceStore>,
        config: &PolicyConfig,
        genesis: Option<Vec<PolicyRule>>,
    ) -> Result<Self> {
        let gate = Self {
            store: store.clone(),
            active: SnapshotCell::new(None),
            frozen: OnceLock::new(),
            amendment_mode: AtomicBool::new(config.amendment_mode),
            amend_lock: Mutex::new(()),
        };

        let history = store.ruleset_history(2).await?;
        match history.first() {
            None => {
                let rules = genesis.ok_or_else(|| {
                    QuorumError::InvalidConfig(
                        "ruleset log is empty and no genesis rules are configured".into(),
                    )
                })?;
                let ruleset = Ruleset::new(1, rules)?;
                let record =
                    ruleset.to_record(None, "genesis", &config.genesis_authorizer, Utc::now());
                store.append_ruleset(&record).await?;
                info!(
                    version = 1,
                    hash = %ruleset.content_hash(),
                    rules = ruleset.rules().len(),
                    "policy gate bootstrapped from genesis ruleset"
                );
                gate.active.publish(Some(Arc::new(ruleset)));
            }
            Some(latest) => match verify_chain(latest, history.get(1)) {
                Ok(ruleset) => {
                    info!(
                        version = ruleset.version(),
                        hash = %ruleset.content_hash(),
                        rules = ruleset.rules().len(),
                        "policy ruleset integrity verified"
                    );
                    gate.active.publish(Some(Arc::new(ruleset)));
                }
                Err(e) => gate.freeze(e.to_string()),
            },
        }

        if gate.state() == GateState::Amending {
            warn!("policy gate started in AMENDMENT mode");
        }
        Ok(gate)
    }

    pub fn state(&self) -> GateState {
        if self.frozen.get().is_some() {
            GateState::Frozen
        } else if self.amendment_mode.load(Ordering::SeqCst) {
            GateState::Amending
        } else {
            GateState::Serving
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.get().is_some()
    }

    /// Reason the gate froze, if it did
    pub fn frozen_reason(&self) -> Option<&str> {
        self.frozen.get().map(String::as_str)
    }

    fn freeze(&self, reason: String) {
        error!(
            reason = %reason,
            "POLICY GATE FROZEN: ruleset integrity check failed; all evaluations will fail until restart with a verified ruleset"
        );
        // First reason wins; a frozen gate is never unfrozen in-process
        let _ = self.frozen.set(reason);
        self.active.publish(None);
    }

    fn integrity_error(&self) -> Option<QuorumError> {
        self.frozen
            .get()
            .map(|reason| QuorumError::IntegrityViolation(reason.clone()))
    }

    /// Active ruleset snapshot
    pub fn ruleset(&self) -> Result<Arc<Ruleset>> {
        if let Some(e) = self.integrity_error() {
            return Err(e);
        }
        self.active
            .load()
            .value
            .clone()
            .ok_or_else(|| QuorumError::IntegrityViolation("no verified ruleset loaded".into()))
    }

    /// Validate a decision against the account.
    pub fn evaluate(&self, decision: &Decision, account: &AccountState) -> Result<GateVerdict> {
        let ruleset = self.ruleset()?;

        let mut violations = Vec::new();
        let mut approval_rule_ids = Vec::new();
        for rule in ruleset.rules() {
            if let Some(detail) = rule.check(decision, account) {
                match rule.category {
                    RuleCategory::Hard => violations.push(RuleViolation {
                        rule_id: rule.id.clone(),
                        detail,
                    }),
                    RuleCategory::RequiresApproval => approval_rule_ids.push(rule.id.clone()),
                }
            }
        }

        let verdict = if !violations.is_empty() {
            Verdict::Reject {
                violations,
                approval_rule_ids,
            }
        } else if !approval_rule_ids.is_empty() {
            Verdict::PendingApproval {
                rule_ids: approval_rule_ids,
            }
        } else {
            Verdict::Accept
        };

        debug!(
            decision_id = %decision.id,
            ruleset_version = ruleset.version(),
            ?verdict,
            "policy evaluation"
        );

        Ok(GateVerdict {
            ruleset_version: ruleset.version(),
            verdict,
        })
    }

    /// Publish a new ruleset version. Only reachable in amendment mode.
    pub async fn amend(
        &self,
        rules: Vec<PolicyRule>,
        reason: &str,
        authorizer: &str,
    ) -> Result<Arc<Ruleset>> {
        if let Some(e) = self.integrity_error() {
            return Err(e);
        }
        if !self.amendment_mode.load(Ordering::SeqCst) {
            return Err(QuorumError::AmendmentDisabled);
        }
        if reason.trim().is_empty() || authorizer.trim().is_empty() {
            return Err(QuorumError::Validation(
                "amendment requires a reason and an authorizer".into(),
            ));
        }

        let _guard = self.amend_lock.lock().await;
        let current = self.ruleset()?;
        let next = Ruleset::new(current.version() + 1, rules)?;
        let record = next.to_record(Some(&current), reason.trim(), authorizer.trim(), Utc::now());
        if record.changelog.is_empty() {
            return Err(QuorumError::Validation("amendment changes no rules".into()));
        }

        self.store.append_ruleset(&record).await?;
        let next = Arc::new(next);
        self.active.publish(Some(next.clone()));

        info!(
            version = next.version(),
            hash = %next.content_hash(),
            authorizer = %record.authorizer,
            changes = ?record.changelog,
            "policy ruleset amended"
        );
        Ok(next)
    }

    pub async fn history(&self, limit: usize) -> Result<Vec<RulesetRecord>> {
        self.store.ruleset_history(limit).await
    }
}

/// Verify the latest record and its link to the one before it.
fn verify_chain(latest: &RulesetRecord, previous: Option<&RulesetRecord>) -> Result<Ruleset> {
    let ruleset = Ruleset::verify_record(latest)?;
    match (previous, &latest.previous_hash) {
        (Some(prev), Some(link)) if prev.content_hash != *link => {
            Err(QuorumError::IntegrityViolation(format!(
                "version {} links to {}, but version {} is recorded with {}",
                latest.version, link, prev.version, prev.content_hash
            )))
        }
        (Some(prev), None) => Err(QuorumError::IntegrityViolation(format!(
            "version {} has no link to version {}",
            latest.version, prev.version
        ))),
        _ => Ok(ruleset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, TieBreakRecord, TieBreakRule};
    use crate::persistence::InMemoryStore;
    use crate::policy::rules::Constraint;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn genesis() -> Vec<PolicyRule> {
        vec![
            PolicyRule::hard(
                "max-order-10pct",
                Constraint::MaxOrderFraction {
                    max_fraction: dec!(0.10),
                },
            ),
            PolicyRule::hard(
                "min-cash-5pct",
                Constraint::MinCashReserveFraction {
                    min_fraction: dec!(0.05),
                },
            ),
            PolicyRule::approval(
                "dca-needs-human",
                Constraint::ActionIn {
                    actions: vec![Action::Dca],
                },
            ),
        ]
    }

    fn decision(action: Action, notional: Decimal) -> Decision {
        Decision {
            id: Uuid::new_v4(),
            instrument: "AAPL".into(),
            action,
            confidence: dec!(0.8),
            notional,
            no_consensus: false,
            tallies: vec![],
            constituents: vec![],
            abstained: vec![],
            tie_break: TieBreakRecord {
                rule: TieBreakRule::SoleQualifier,
                contenders: vec![action],
            },
            weight_generation: 0,
            decided_at: Utc::now(),
        }
    }

    async fn gate(amend: bool) -> (PolicyGate, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let config = PolicyConfig {
            amendment_mode: amend,
            ..Default::default()
        };
        let gate = PolicyGate::load(store.clone(), &config, Some(genesis()))
            .await
            .unwrap();
        (gate, store)
    }

    #[tokio::test]
    async fn test_collects_all_violations() {
        let (gate, _) = gate(false).await;
        // 15% of capital and drains cash below the reserve
        let account = AccountState::new(dec!(100000), dec!(16000));
        let verdict = gate
            .evaluate(&decision(Action::Buy, dec!(15000)), &account)
            .unwrap();
        match verdict.verdict {
            Verdict::Reject { violations, .. } => {
                let ids: Vec<_> = violations.iter().map(|v| v.rule_id.as_str()).collect();
                assert_eq!(ids, vec!["max-order-10pct", "min-cash-5pct"]);
            }
            other => panic!("expected reject, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_approval_rule_suspends() {
        let (gate, _) = gate(false).await;
        let account = AccountState::new(dec!(100000), dec!(50000));
        let verdict = gate
            .evaluate(&decision(Action::Dca, dec!(1000)), &account)
            .unwrap();
        assert_eq!(
            verdict.verdict,
            Verdict::PendingApproval {
                rule_ids: vec!["dca-needs-human".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_hard_violation_dominates_approval() {
        let (gate, _) = gate(false).await;
        let account = AccountState::new(dec!(100000), dec!(50000));
        let verdict = gate
            .evaluate(&decision(Action::Dca, dec!(20000)), &account)
            .unwrap();
        match verdict.verdict {
            Verdict::Reject {
                approval_rule_ids, ..
            } => assert_eq!(approval_rule_ids, vec!["dca-needs-human".to_string()]),
            other => panic!("expected reject, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_amend_disabled_in_serving_mode() {
        let (gate, _) = gate(false).await;
        let err = gate.amend(genesis(), "tighten", "cio").await.unwrap_err();
        assert!(matches!(err, QuorumError::AmendmentDisabled));
        assert_eq!(gate.ruleset().unwrap().version(), 1);
    }

    #[tokio::test]
    async fn test_amend_publishes_next_version_and_reloads_clean() {
        let (gate, store) = gate(true).await;
        let mut rules = genesis();
        rules.pop();
        let next = gate.amend(rules, "drop DCA approval", "cio").await.unwrap();
        assert_eq!(next.version(), 2);

        let history = gate.history(10).await.unwrap();
        assert_eq!(history[0].version, 2);
        assert_eq!(history[0].changelog, vec!["removed dca-needs-human".to_string()]);
        assert_eq!(history[0].previous_hash.as_deref(), Some(history[1].content_hash.as_str()));

        let reloaded = PolicyGate::load(store, &PolicyConfig::default(), None)
            .await
            .unwrap();
        assert_eq!(reloaded.state(), GateState::Serving);
        assert_eq!(reloaded.ruleset().unwrap().version(), 2);
    }

    #[tokio::test]
    async fn test_no_op_amendment_rejected() {
        let (gate, _) = gate(true).await;
        let err = gate.amend(genesis(), "same", "cio").await.unwrap_err();
        assert!(matches!(err, QuorumError::Validation(_)));
    }

    #[tokio::test]
    async fn test_tampered_store_freezes_gate() {
        let (_, store) = gate(false).await;
        store
            .tamper_latest_ruleset(|doc| doc.replace("0.10", "0.90"))
            .await;

        let frozen = PolicyGate::load(store, &PolicyConfig::default(), None)
            .await
            .unwrap();
        assert_eq!(frozen.state(), GateState::Frozen);
        let account = AccountState::new(dec!(100000), dec!(50000));
        let err = frozen
            .evaluate(&decision(Action::Buy, dec!(100)), &account)
            .unwrap_err();
        assert!(err.is_fatal());
        // Retrying does not unstick it
        assert!(frozen
            .evaluate(&decision(Action::Hold, Decimal::ZERO), &account)
            .is_err());
    }

    #[tokio::test]
    async fn test_empty_log_without_genesis_is_config_error() {
        let store = Arc::new(InMemoryStore::new());
        let result = PolicyGate::load(store, &PolicyConfig::default(), None).await;
        assert!(matches!(result, Err(QuorumError::InvalidConfig(_))));
    }
}
