//! Action types for previews and apply reports

use crate::graph::ResourceKind;
use serde::{Deserialize, Serialize};

/// Represents a planned action for one logical resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Logical name
    pub name: String,

    pub kind: ResourceKind,

    /// Type of action to perform
    pub action_type: ActionType,

    /// External ID of the recorded resource, if any
    pub external_id: Option<String>,

    /// Fingerprint of the desired parameters, when it can be computed yet
    pub fingerprint: Option<String>,

    /// Human readable explanation (drift reason, missing dependency, ...)
    pub reason: Option<String>,
}

impl Action {
    pub fn new(name: impl Into<String>, kind: ResourceKind, action_type: ActionType) -> Self {
        Self {
            name: name.into(),
            kind,
            action_type,
            external_id: None,
            fingerprint: None,
            reason: None,
        }
    }

    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = Some(id.into());
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Type of action to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// No record yet; the resource will be created
    Create,
    /// Recorded with a matching fingerprint; reused as is
    NoOp,
    /// Fingerprint differs and the replace policy is set
    Replace,
    /// Fingerprint differs and apply would fail with a drift error
    Conflict,
    /// A dependency is not realized yet, so the fingerprint is unknown
    Pending,
    /// Recorded but no longer part of the graph
    Orphan,
    /// Recorded resource will be deleted
    Delete,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::NoOp => write!(f, "no-op"),
            ActionType::Replace => write!(f, "replace"),
            ActionType::Conflict => write!(f, "conflict"),
            ActionType::Pending => write!(f, "pending"),
            ActionType::Orphan => write!(f, "orphan"),
            ActionType::Delete => write!(f, "delete"),
        }
    }
}

/// Result of a successful apply or destroy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyReport {
    /// Newly created, in completion order
    pub created: Vec<String>,

    /// Recorded with a matching fingerprint
    pub reused: Vec<String>,

    /// Deleted and created again under the replace policy
    pub replaced: Vec<String>,

    /// Deleted by teardown, in deletion order
    pub deleted: Vec<String>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl ApplyReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nothing was created, replaced or deleted
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.replaced.is_empty() && self.deleted.is_empty()
    }
}

/// Ordered preview of what apply or destroy would do
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    /// Actions in execution order
    pub actions: Vec<Action>,

    /// Whether the plan has any changes
    pub has_changes: bool,
}

impl Plan {
    pub fn new(actions: Vec<Action>) -> Self {
        let has_changes = actions
            .iter()
            .any(|a| !matches!(a.action_type, ActionType::NoOp | ActionType::Orphan));
        Self {
            actions,
            has_changes,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Get actions by type
    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    /// Apply would stop on a drift conflict
    pub fn has_conflicts(&self) -> bool {
        self.actions
            .iter()
            .any(|a| a.action_type == ActionType::Conflict)
    }

    /// Summary of the plan
    pub fn summary(&self) -> PlanSummary {
        let count = |t| self.actions_by_type(t).len();
        PlanSummary {
            create: count(ActionType::Create) + count(ActionType::Pending),
            replace: count(ActionType::Replace),
            delete: count(ActionType::Delete),
            conflict: count(ActionType::Conflict),
            orphan: count(ActionType::Orphan),
            no_change: count(ActionType::NoOp),
        }
    }
}

/// Summary of planned actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub replace: usize,
    pub delete: usize,
    pub conflict: usize,
    pub orphan: usize,
    pub no_change: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to replace, {} to delete, {} unchanged",
            self.create, self.replace, self.delete, self.no_change
        )?;
        if self.conflict > 0 {
            write!(f, ", {} in conflict", self.conflict)?;
        }
        if self.orphan > 0 {
            write!(f, ", {} orphaned", self.orphan)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_summary() {
        let plan = Plan::new(vec![
            Action::new("vpc", ResourceKind::Network, ActionType::NoOp),
            Action::new("a", ResourceKind::Subnet, ActionType::Create),
            Action::new("b", ResourceKind::Subnet, ActionType::Pending),
            Action::new("sg", ResourceKind::SecurityGroup, ActionType::Conflict)
                .with_reason("fingerprint changed"),
        ]);

        assert!(plan.has_changes);
        assert!(plan.has_conflicts());
        assert_eq!(
            plan.summary().to_string(),
            "2 to create, 0 to replace, 0 to delete, 1 unchanged, 1 in conflict"
        );
    }

    #[test]
    fn test_noop_plan_has_no_changes() {
        let plan = Plan::new(vec![
            Action::new("vpc", ResourceKind::Network, ActionType::NoOp),
            Action::new("old", ResourceKind::Subnet, ActionType::Orphan),
        ]);
        assert!(!plan.has_changes);
        assert_eq!(plan.summary().orphan, 1);
        assert!(Plan::empty().actions.is_empty());
    }
}
