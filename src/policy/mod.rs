//! Policy gate: versioned, hash-verified rulesets

pub mod gate;
pub mod rules;
pub mod ruleset;

pub use gate::{GateState, GateVerdict, PolicyConfig, PolicyGate, Verdict};
pub use rules::{Constraint, PolicyRule, RuleCategory};
pub use ruleset::{changelog, hash_document, Ruleset, RulesetFile, RulesetRecord};
