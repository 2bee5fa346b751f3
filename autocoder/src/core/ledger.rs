//! Progress ledger model: parsing, the append-only transition rule and summaries.
//!
//! Records are identified by `feature`. Once written, only `passes` may change
//! and only from `false` to `true`. New records may be appended after the
//! existing ones as long as they start out failing.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use jsonschema::{Validator, validator_for};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::LedgerError;

static LEDGER_SCHEMA: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/schemas/feature_list.schema.json"
    )))
    .expect("embedded ledger schema is valid JSON");
    validator_for(&schema).expect("embedded ledger schema compiles")
});

/// One row of `feature_list.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub feature: String,
    pub description: String,
    pub test_procedure: Vec<String>,
    pub passes: bool,
    /// Keys the agent added beyond the required four; preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Feature {
    /// Same record apart from `passes`.
    fn same_identity(&self, other: &Feature) -> bool {
        self.feature == other.feature
            && self.description == other.description
            && self.test_procedure == other.test_procedure
            && self.extra == other.extra
    }
}

/// The ordered feature list, serialized as a bare JSON array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger {
    pub features: Vec<Feature>,
}

/// Why ledger bytes could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerDefect {
    /// Empty or cut off mid-write; an initialization never finished.
    Truncated(String),
    /// Well-formed JSON with the wrong structure; needs an operator.
    Malformed(String),
}

/// Result of `Ledger::mark_complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Completed,
    AlreadyComplete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub total: usize,
    pub complete: usize,
    pub incomplete: usize,
    pub percent: f64,
}

impl LedgerSummary {
    pub fn is_done(&self) -> bool {
        self.total > 0 && self.complete == self.total
    }
}

/// Ledger to persist after a session plus what changed and what was refused.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub ledger: Ledger,
    pub completed: Vec<String>,
    pub appended: Vec<String>,
    pub violations: Vec<String>,
}

impl Reconciled {
    pub fn changed(&self) -> bool {
        !self.completed.is_empty() || !self.appended.is_empty()
    }
}

impl Ledger {
    pub fn new(features: Vec<Feature>) -> Self {
        Self { features }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Feature> {
        self.features.iter().find(|feature| feature.feature == name)
    }

    pub fn summary(&self) -> LedgerSummary {
        let total = self.features.len();
        let complete = self.features.iter().filter(|feature| feature.passes).count();
        let percent = if total == 0 {
            0.0
        } else {
            complete as f64 * 100.0 / total as f64
        };
        LedgerSummary {
            total,
            complete,
            incomplete: total - complete,
            percent,
        }
    }

    /// Names of the first `limit` failing features, in ledger order.
    pub fn next_incomplete(&self, limit: usize) -> Vec<String> {
        self.features
            .iter()
            .filter(|feature| !feature.passes)
            .take(limit)
            .map(|feature| feature.feature.clone())
            .collect()
    }

    pub fn mark_complete(&mut self, name: &str) -> Result<Transition, LedgerError> {
        let feature = self
            .features
            .iter_mut()
            .find(|feature| feature.feature == name)
            .ok_or_else(|| LedgerError::UnknownFeature {
                name: name.to_string(),
            })?;
        if feature.passes {
            return Ok(Transition::AlreadyComplete);
        }
        feature.passes = true;
        Ok(Transition::Completed)
    }

    /// Pretty JSON with a trailing newline, the on-disk form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let mut buf = serde_json::to_string_pretty(self)?;
        buf.push('\n');
        Ok(buf)
    }

    fn duplicate_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for feature in &self.features {
            if !seen.insert(feature.feature.as_str()) && !duplicates.contains(&feature.feature) {
                duplicates.push(feature.feature.clone());
            }
        }
        duplicates
    }
}

/// Parse ledger bytes: JSON syntax, then schema, then data, then unique names.
pub fn parse_ledger(bytes: &[u8]) -> Result<Ledger, LedgerDefect> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(LedgerDefect::Truncated("ledger file is empty".to_string()));
    }
    let value: Value = serde_json::from_slice(bytes).map_err(|err| {
        if err.is_eof() || err.is_syntax() {
            LedgerDefect::Truncated(format!("ledger is not complete JSON: {err}"))
        } else {
            LedgerDefect::Malformed(err.to_string())
        }
    })?;
    if !LEDGER_SCHEMA.is_valid(&value) {
        let messages = LEDGER_SCHEMA
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(LedgerDefect::Malformed(format!(
            "schema validation failed: {}",
            messages.join("; ")
        )));
    }
    let ledger: Ledger =
        serde_json::from_value(value).map_err(|err| LedgerDefect::Malformed(err.to_string()))?;
    let duplicates = ledger.duplicate_names();
    if !duplicates.is_empty() {
        return Err(LedgerDefect::Malformed(format!(
            "duplicate feature names: {}",
            duplicates.join(", ")
        )));
    }
    Ok(ledger)
}

/// List every way `next` breaks the append-only rule relative to `prev`.
///
/// Returns stable messages in `prev` order, then appended records in `next` order.
pub fn check_transition(prev: &Ledger, next: &Ledger) -> Vec<String> {
    let next_index: HashMap<&str, usize> = next
        .features
        .iter()
        .enumerate()
        .map(|(index, feature)| (feature.feature.as_str(), index))
        .collect();

    let mut errors = Vec::new();
    for (index, old) in prev.features.iter().enumerate() {
        let Some(&position) = next_index.get(old.feature.as_str()) else {
            errors.push(format!("feature '{}' was removed", old.feature));
            continue;
        };
        let new = &next.features[position];
        if position != index {
            errors.push(format!(
                "feature '{}' moved from position {} to {}",
                old.feature, index, position
            ));
        }
        if new.description != old.description {
            errors.push(format!("feature '{}' description changed", old.feature));
        }
        if new.test_procedure != old.test_procedure {
            errors.push(format!("feature '{}' test_procedure changed", old.feature));
        }
        if new.extra != old.extra {
            errors.push(format!(
                "feature '{}' fields other than passes changed",
                old.feature
            ));
        }
        if old.passes && !new.passes {
            errors.push(format!(
                "feature '{}' passes regressed from true to false",
                old.feature
            ));
        }
    }

    let known: HashSet<&str> = prev
        .features
        .iter()
        .map(|feature| feature.feature.as_str())
        .collect();
    for feature in &next.features {
        if !known.contains(feature.feature.as_str()) && feature.passes {
            errors.push(format!(
                "appended feature '{}' is already marked passing",
                feature.feature
            ));
        }
    }
    errors
}

/// Accept `next` only if it follows the append-only rule.
pub fn checked_update(prev: &Ledger, next: Ledger) -> Result<Ledger, LedgerError> {
    let violations = check_transition(prev, &next);
    if violations.is_empty() {
        Ok(next)
    } else {
        Err(LedgerError::InvariantViolation { violations })
    }
}

/// Build the ledger to keep after a session from the one the agent left behind.
///
/// Legal `false -> true` flips on unchanged records and new records are carried
/// over; everything else stays as it was in `prev` and is reported.
pub fn reconcile(prev: &Ledger, next: &Ledger) -> Reconciled {
    let violations = check_transition(prev, next);
    let mut ledger = prev.clone();
    let mut completed = Vec::new();

    for feature in &mut ledger.features {
        if feature.passes {
            continue;
        }
        if let Some(candidate) = next.get(&feature.feature)
            && candidate.passes
            && candidate.same_identity(feature)
        {
            feature.passes = true;
            completed.push(feature.feature.clone());
        }
    }

    let known: HashSet<&str> = prev
        .features
        .iter()
        .map(|feature| feature.feature.as_str())
        .collect();
    let mut appended = Vec::new();
    for feature in &next.features {
        if known.contains(feature.feature.as_str()) {
            continue;
        }
        let mut record = feature.clone();
        record.passes = false;
        appended.push(record.feature.clone());
        ledger.features.push(record);
    }

    Reconciled {
        ledger,
        completed,
        appended,
        violations,
    }
}
