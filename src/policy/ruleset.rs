//! Versioned, content-hashed rulesets
//!
//! A ruleset is serialized to one canonical JSON document (rules sorted by
//! id). The SHA-256 of exactly those bytes is the integrity hash recorded with
//! the amendment that produced it. Verification always hashes the stored
//! bytes, never a re-serialization, so any byte change is detected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};

use super::rules::PolicyRule;
use crate::error::{QuorumError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ruleset {
    version: u64,
    rules: Vec<PolicyRule>,
    document: String,
    content_hash: String,
}

#[derive(Serialize)]
struct DocumentRef<'a> {
    version: u64,
    rules: &'a [PolicyRule],
}

#[derive(Deserialize)]
struct DocumentOwned {
    version: u64,
    rules: Vec<PolicyRule>,
}

/// TOML layout for ruleset files (`[[rules]]` tables)
#[derive(Debug, Deserialize)]
pub struct RulesetFile {
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

impl RulesetFile {
    pub fn parse(raw: &str) -> Result<Vec<PolicyRule>> {
        let file: RulesetFile = toml::from_str(raw)?;
        Ok(file.rules)
    }
}

/// One entry of the append-only ruleset log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesetRecord {
    pub version: u64,
    /// Canonical document text, hashed byte-for-byte
    pub document: String,
    pub content_hash: String,
    pub previous_hash: Option<String>,
    pub reason: String,
    pub authorizer: String,
    pub changelog: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}

pub fn hash_document(document: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document.as_bytes());
    hex::encode(hasher.finalize())
}

impl Ruleset {
    pub fn new(version: u64, mut rules: Vec<PolicyRule>) -> Result<Self> {
        let mut seen = HashSet::new();
        for rule in &rules {
            if rule.id.trim().is_empty() {
                return Err(QuorumError::Validation("rule id must not be empty".into()));
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(QuorumError::Validation(format!(
                    "duplicate rule id '{}'",
                    rule.id
                )));
            }
        }
        rules.sort_by(|a, b| a.id.cmp(&b.id));

        let document = serde_json::to_string(&DocumentRef {
            version,
            rules: &rules,
        })?;
        let content_hash = hash_document(&document);

        Ok(Self {
            version,
            rules,
            document,
            content_hash,
        })
    }

    /// Rebuild a ruleset from stored bytes, checking them against the recorded hash.
    pub fn verify(document: &str, recorded_hash: &str) -> Result<Self> {
        let actual = hash_document(document);
        if actual != recorded_hash {
            return Err(QuorumError::IntegrityViolation(format!(
                "content hash mismatch: recorded {}, computed {}",
                recorded_hash, actual
            )));
        }

        let parsed: DocumentOwned = serde_json::from_str(document).map_err(|e| {
            QuorumError::IntegrityViolation(format!("ruleset document unreadable: {}", e))
        })?;
        let ordered = parsed.rules.windows(2).all(|w| w[0].id < w[1].id);
        if !ordered {
            return Err(QuorumError::IntegrityViolation(
                "ruleset document is not in canonical order".into(),
            ));
        }

        Ok(Self {
            version: parsed.version,
            rules: parsed.rules,
            document: document.to_string(),
            content_hash: actual,
        })
    }

    pub fn verify_record(record: &RulesetRecord) -> Result<Self> {
        let ruleset = Self::verify(&record.document, &record.content_hash)?;
        if ruleset.version != record.version {
            return Err(QuorumError::IntegrityViolation(format!(
                "record version {} does not match document version {}",
                record.version, ruleset.version
            )));
        }
        Ok(ruleset)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Log entry publishing this ruleset
    pub fn to_record(
        &self,
        previous: Option<&Ruleset>,
        reason: &str,
        authorizer: &str,
        at: DateTime<Utc>,
    ) -> RulesetRecord {
        let changelog = match previous {
            Some(prev) => changelog(prev.rules(), self.rules()),
            None => self
                .rules
                .iter()
                .map(|r| format!("added {}", r.id))
                .collect(),
        };
        RulesetRecord {
            version: self.version,
            document: self.document.clone(),
            content_hash: self.content_hash.clone(),
            previous_hash: previous.map(|p| p.content_hash.clone()),
            reason: reason.to_string(),
            authorizer: authorizer.to_string(),
            changelog,
            recorded_at: at,
        }
    }
}

/// Human-readable diff between two rule lists, keyed by rule id
pub fn changelog(old: &[PolicyRule], new: &[PolicyRule]) -> Vec<String> {
    let old_by_id: BTreeMap<&str, &PolicyRule> = old.iter().map(|r| (r.id.as_str(), r)).collect();
    let new_by_id: BTreeMap<&str, &PolicyRule> = new.iter().map(|r| (r.id.as_str(), r)).collect();

    let mut changes = Vec::new();
    for (id, rule) in &new_by_id {
        match old_by_id.get(id) {
            None => changes.push(format!("added {}", id)),
            Some(prev) if prev != rule => changes.push(format!("modified {}", id)),
            Some(_) => {}
        }
    }
    for id in old_by_id.keys() {
        if !new_by_id.contains_key(id) {
            changes.push(format!("removed {}", id));
        }
    }
    changes
}
