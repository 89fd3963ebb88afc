//! Diff types for resources

use crate::resource::{ResourceId, ResourceRef};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Name of the synthesized change item for resources whose parent changed
pub const PARENT_CHANGED: &str = "parent";

/// A single attribute-level change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDiffItem {
    /// Attribute name (e.g. "rules", "type")
    pub name: String,
    /// Whether the attribute differs from the desired state
    pub changed: bool,
    /// Whether applying the change requires destroy-and-recreate
    pub needs_recreate: bool,
}

impl ResourceDiffItem {
    /// An attribute that can be updated in place
    pub fn changed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            changed: true,
            needs_recreate: false,
        }
    }

    /// An attribute that can only change by recreating the resource
    pub fn recreate(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            changed: true,
            needs_recreate: true,
        }
    }
}

/// The computed difference between desired and observed state of one resource
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// The resource this diff describes
    pub resource: ResourceRef,
    /// Attribute-level changes
    pub changes: Vec<ResourceDiffItem>,
    /// Remote state is absent entirely
    pub missing: bool,
}

impl ResourceDiff {
    /// Diff for a resource that does not exist remotely
    pub fn missing(resource: ResourceRef) -> Self {
        Self {
            resource,
            changes: Vec::new(),
            missing: true,
        }
    }

    /// Diff for a resource that matches its desired state
    pub fn unchanged(resource: ResourceRef) -> Self {
        Self {
            resource,
            changes: Vec::new(),
            missing: false,
        }
    }

    /// Diff carrying attribute-level changes
    pub fn with_changes(resource: ResourceRef, changes: Vec<ResourceDiffItem>) -> Self {
        Self {
            resource,
            changes,
            missing: false,
        }
    }

    /// Synthesized diff for a resource whose infra parent changed
    pub fn parent_changed(resource: ResourceRef) -> Self {
        Self::with_changes(resource, vec![ResourceDiffItem::changed(PARENT_CHANGED)])
    }

    pub fn has_changes(&self) -> bool {
        self.changes.iter().any(|c| c.changed)
    }

    pub fn is_missing(&self) -> bool {
        self.missing
    }

    pub fn has_changes_or_missing(&self) -> bool {
        self.has_changes() || self.is_missing()
    }

    /// Whether the resource has to be destroyed before it is applied
    pub fn needs_recreate(&self) -> bool {
        self.missing || self.changes.iter().any(|c| c.needs_recreate)
    }

    /// Names of the changed attributes
    pub fn changed_attributes(&self) -> Vec<&str> {
        self.changes
            .iter()
            .filter(|c| c.changed)
            .map(|c| c.name.as_str())
            .collect()
    }
}

impl fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.missing {
            return write!(f, "{} (missing)", self.resource.id());
        }
        write!(
            f,
            "{} ({})",
            self.resource.id(),
            self.changed_attributes().join(", ")
        )
    }
}

/// Identities of every resource that changed or is missing
pub fn changed_or_missing<'a>(
    diffs: impl IntoIterator<Item = &'a ResourceDiff>,
) -> HashSet<ResourceId> {
    diffs
        .into_iter()
        .filter(|d| d.has_changes_or_missing())
        .map(|d| d.resource.id())
        .collect()
}

/// Diff summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    /// Resources missing remotely
    pub missing: usize,
    /// Resources with in-place changes
    pub changed: usize,
    /// Resources that will be destroyed and recreated
    pub recreate: usize,
    /// Resources already in desired state
    pub unchanged: usize,
}

impl DiffSummary {
    /// Create a summary from a list of diffs
    pub fn from_diffs(diffs: &[ResourceDiff]) -> Self {
        let mut summary = Self::default();
        for diff in diffs {
            if diff.is_missing() {
                summary.missing += 1;
            } else if diff.needs_recreate() {
                summary.recreate += 1;
            } else if diff.has_changes() {
                summary.changed += 1;
            } else {
                summary.unchanged += 1;
            }
        }
        summary
    }

    /// Total number of resources that need work
    pub fn total_changes(&self) -> usize {
        self.missing + self.changed + self.recreate
    }

    pub fn has_changes(&self) -> bool {
        self.total_changes() > 0
    }
}
