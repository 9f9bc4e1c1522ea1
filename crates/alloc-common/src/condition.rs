//! Status conditions recorded on allocation and index resources.
//!
//! Two condition kinds are used: `Synced` tracks the outcome of the last
//! reconcile and `Ready` tracks whether the resource is usable. Both must be
//! true for the remaining status fields to be meaningful.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionKind {
    Ready,
    Synced,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionReason {
    #[default]
    Unknown,
    Ready,
    Failed,
    ReconcileSuccess,
    ReconcileError,
}

impl fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One observed condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub kind: ConditionKind,
    pub status: ConditionStatus,
    pub reason: ConditionReason,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    fn new(kind: ConditionKind, status: ConditionStatus, reason: ConditionReason) -> Self {
        Self {
            kind,
            status,
            reason,
            message: String::new(),
            last_transition_time: Utc::now(),
        }
    }

    /// Compares everything but the transition time.
    pub fn equal(&self, other: &Condition) -> bool {
        self.kind == other.kind
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }

    /// Returns a copy with the message replaced; an empty message clears it.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

impl PartialEq for Condition {
    fn eq(&self, other: &Self) -> bool {
        self.equal(other)
    }
}

/// The resource is usable.
pub fn ready() -> Condition {
    Condition::new(ConditionKind::Ready, ConditionStatus::True, ConditionReason::Ready)
}

/// Readiness is not known yet.
pub fn unknown() -> Condition {
    Condition::new(ConditionKind::Ready, ConditionStatus::False, ConditionReason::Unknown)
}

/// The resource failed to become ready.
pub fn failed(message: impl Into<String>) -> Condition {
    Condition::new(ConditionKind::Ready, ConditionStatus::False, ConditionReason::Failed)
        .with_message(message)
}

/// The last reconcile succeeded.
pub fn reconcile_success() -> Condition {
    Condition::new(
        ConditionKind::Synced,
        ConditionStatus::True,
        ConditionReason::ReconcileSuccess,
    )
}

/// The last reconcile failed with `err`.
pub fn reconcile_error(err: &dyn std::error::Error) -> Condition {
    Condition::new(
        ConditionKind::Synced,
        ConditionStatus::False,
        ConditionReason::ReconcileError,
    )
    .with_message(err.to_string())
}

/// A set of conditions, at most one per kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionedStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl ConditionedStatus {
    pub fn new(conditions: impl IntoIterator<Item = Condition>) -> Self {
        let mut status = Self::default();
        status.set_conditions(conditions);
        status
    }

    /// Returns the condition of `kind`, or an Unknown placeholder.
    pub fn get_condition(&self, kind: ConditionKind) -> Condition {
        self.conditions
            .iter()
            .find(|c| c.kind == kind)
            .cloned()
            .unwrap_or_else(|| Condition::new(kind, ConditionStatus::Unknown, ConditionReason::Unknown))
    }

    /// Sets each condition, replacing an existing one of the same kind.
    ///
    /// A condition equal to the existing one keeps the existing transition time.
    pub fn set_conditions(&mut self, conditions: impl IntoIterator<Item = Condition>) {
        for c in conditions {
            match self.conditions.iter_mut().find(|existing| existing.kind == c.kind) {
                Some(existing) if existing.equal(&c) => {}
                Some(existing) => *existing = c,
                None => self.conditions.push(c),
            }
        }
    }

    /// Order-insensitive comparison ignoring transition times.
    pub fn equal(&self, other: &ConditionedStatus) -> bool {
        self.conditions.len() == other.conditions.len()
            && self
                .conditions
                .iter()
                .all(|c| other.conditions.iter().any(|o| o.equal(c)))
    }

    /// Ready and Synced are both true.
    pub fn is_ready(&self) -> bool {
        self.get_condition(ConditionKind::Ready).is_true()
            && self.get_condition(ConditionKind::Synced).is_true()
    }
}

impl PartialEq for ConditionedStatus {
    fn eq(&self, other: &Self) -> bool {
        self.equal(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AllocError;

    #[test]
    fn test_condition_equal_ignores_timestamp() {
        let mut a = ready();
        let b = ready();
        a.last_transition_time = DateTime::<Utc>::MIN_UTC;
        assert!(a.equal(&b));
        assert!(!ready().equal(&reconcile_success()));
        assert!(!ready().with_message("a").equal(&ready().with_message("b")));
    }

    #[test]
    fn test_with_message_replaces_and_clears() {
        let c = ready().with_message("aaaa").with_message("abc");
        assert_eq!(c.message, "abc");
        assert!(c.with_message("").message.is_empty());
    }

    #[test]
    fn test_conditioned_status_equal() {
        let a = ConditionedStatus::new([unknown(), reconcile_success()]);
        let b = ConditionedStatus::new([reconcile_success(), unknown()]);
        assert_eq!(a, b);
        assert_ne!(a, ConditionedStatus::new([reconcile_success()]));
        let err = AllocError::Cancelled;
        assert_ne!(
            ConditionedStatus::new([ready(), reconcile_success()]),
            ConditionedStatus::new([ready(), reconcile_error(&err)])
        );
    }

    #[test]
    fn test_set_conditions() {
        let mut cs = ConditionedStatus::new([unknown()]);
        cs.set_conditions([ready()]);
        assert_eq!(cs, ConditionedStatus::new([ready()]));

        let mut cs = ConditionedStatus::new([reconcile_success()]);
        cs.set_conditions([ready()]);
        assert_eq!(cs, ConditionedStatus::new([reconcile_success(), ready()]));
        assert!(cs.is_ready());
    }

    #[test]
    fn test_get_condition_placeholder() {
        let cs = ConditionedStatus::new([ready()]);
        assert_eq!(cs.get_condition(ConditionKind::Ready), ready());
        let synced = cs.get_condition(ConditionKind::Synced);
        assert_eq!(synced.status, ConditionStatus::Unknown);
        assert_eq!(synced.kind, ConditionKind::Synced);
    }
}
