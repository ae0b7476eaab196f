//! Validation rule chain.
//!
//! Every record is run through the same fixed sequence of [`RuleId`]s. A record collects errors
//! from all rules that apply to it, so one pass reports everything wrong with it. The one
//! exception is a rule whose [`Precondition`] does not hold (for example "program resolved"):
//! that rule is skipped for the record and reports nothing, since an earlier rule has already
//! reported the unresolved reference it depends on.
//!
//! Records are independent of each other once the [`WorkContext`] exists, so the chain evaluates
//! them in parallel. Results are gathered back in input order.

mod rules;

pub use rules::RuleId;

use crate::records::{RecordKey, TrackerRecord, TrackerType};
use crate::work_context::WorkContext;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Blocks the record from being committed.
    Error,
    /// Advisory only.
    Warning,
}

/// One problem found with one record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    pub reference: String,
    pub tracker_type: TrackerType,
    pub rule: RuleId,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub severity: Severity,
}

impl ValidationError {
    pub fn error(record: &TrackerRecord, rule: RuleId, message: impl Into<String>) -> Self {
        Self {
            reference: record.uid().to_owned(),
            tracker_type: record.tracker_type(),
            rule,
            message: message.into(),
            field: None,
            severity: Severity::Error,
        }
    }

    pub fn warning(record: &TrackerRecord, rule: RuleId, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(record, rule, message)
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.tracker_type, self.reference.as_str())
    }
}

/// A condition on the work context that a rule needs before it can say anything useful.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Precondition {
    /// The record's program reference resolved.
    ProgramResolved,
    /// The record's org-unit reference resolved.
    OrgUnitResolved,
    /// The record's parent is in the batch or in the store.
    ParentResolved,
}

impl Precondition {
    pub fn is_met(self, record: &TrackerRecord, context: &WorkContext) -> bool {
        match self {
            Self::ProgramResolved => record
                .program()
                .is_some_and(|reference| context.program(reference).is_some()),
            Self::OrgUnitResolved => context.organisation_unit(record.org_unit()).is_some(),
            Self::ParentResolved => context.parent_resolved(record),
        }
    }
}

/// Errors found in one batch, in record order then rule order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    errors: Vec<ValidationError>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<ValidationError> {
        self.errors
    }

    pub fn errors_for(&self, tracker_type: TrackerType, reference: &str) -> Vec<&ValidationError> {
        self.errors
            .iter()
            .filter(|e| e.tracker_type == tracker_type && e.reference == reference)
            .collect()
    }

    /// True when no error of either severity was recorded for the record.
    pub fn is_valid(&self, tracker_type: TrackerType, reference: &str) -> bool {
        self.errors_for(tracker_type, reference).is_empty()
    }

    pub fn has_blocking_errors(&self) -> bool {
        self.errors.iter().any(ValidationError::is_blocking)
    }

    pub fn has_warnings(&self) -> bool {
        self.errors.iter().any(|e| !e.is_blocking())
    }

    /// Records carrying at least one blocking error.
    pub fn blocked(&self) -> HashSet<RecordKey> {
        self.errors
            .iter()
            .filter(|e| e.is_blocking())
            .map(ValidationError::key)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn extend(&mut self, errors: impl IntoIterator<Item = ValidationError>) {
        self.errors.extend(errors);
    }
}

/// The ordered list of rules a batch is validated against.
#[derive(Clone, Debug)]
pub struct ValidationChain {
    rules: Vec<RuleId>,
}

impl Default for ValidationChain {
    fn default() -> Self {
        Self {
            rules: RuleId::ORDER.to_vec(),
        }
    }
}

impl ValidationChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// A chain running only `rules`, in the given order.
    pub fn with_rules(rules: impl IntoIterator<Item = RuleId>) -> Self {
        Self {
            rules: rules.into_iter().collect(),
        }
    }

    pub fn rules(&self) -> &[RuleId] {
        &self.rules
    }

    /// Validate every record against the context.
    ///
    /// The context must have been built from the same records.
    pub fn validate(&self, records: &[TrackerRecord], context: &WorkContext) -> ValidationReport {
        let per_record: Vec<Vec<ValidationError>> = records
            .par_iter()
            .map(|record| self.validate_record(record, context))
            .collect();

        let mut report = ValidationReport::new();
        report.extend(per_record.into_iter().flatten());
        report
    }

    pub fn validate_record(
        &self,
        record: &TrackerRecord,
        context: &WorkContext,
    ) -> Vec<ValidationError> {
        let strategy = context.options().import_strategy();
        let mut errors = Vec::new();

        for rule in &self.rules {
            if !rule.applies_to(record.tracker_type()) || !rule.runs_under(strategy) {
                continue;
            }
            if let Some(unmet) = rule
                .requires()
                .iter()
                .find(|precondition| !precondition.is_met(record, context))
            {
                tracing::debug!(
                    "skipping {} for {} {}: {:?} not met",
                    rule,
                    record.tracker_type(),
                    record.uid(),
                    unmet
                );
                continue;
            }
            errors.extend(rule.evaluate(record, context));
        }

        errors
    }
}
