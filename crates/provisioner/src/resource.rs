//! Resource trait for infrastructure reconciliation
//!
//! A Resource is an immutable description of desired infrastructure state.
//! It has a stable identity, a kind that selects the adapter responsible
//! for it, optional infra parents and an optional health check.

use serde::Serialize;
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Kind of an infrastructure resource
///
/// The kind decides which adapter in the
/// [`ProvisionerRegistry`](crate::registry::ProvisionerRegistry) handles a
/// resource. Kinds without a dedicated variant use [`ResourceKind::Custom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    FloatingIp,
    FloatingIpAssignment,
    Server,
    Volume,
    Network,
    SshKey,
    VaultMount,
    VaultPolicy,
    Custom(&'static str),
}

impl ResourceKind {
    /// Stable snake_case name used in logs and resource ids
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FloatingIp => "floating_ip",
            Self::FloatingIpAssignment => "floating_ip_assignment",
            Self::Server => "server",
            Self::Volume => "volume",
            Self::Network => "network",
            Self::SshKey => "ssh_key",
            Self::VaultMount => "vault_mount",
            Self::VaultPolicy => "vault_policy",
            Self::Custom(name) => *name,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a resource
///
/// Two resources are the same resource when kind and name are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    kind: ResourceKind,
    name: String,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

impl Serialize for ResourceId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Observed remote state of a resource, as returned by a lookup
pub type RuntimeState = serde_json::Value;

/// Zero-argument health predicate attached to a resource
///
/// Returns `true` when the resource is healthy. Cloning is cheap.
#[derive(Clone)]
pub struct HealthCheck(Arc<dyn Fn() -> bool + Send + Sync>);

impl HealthCheck {
    pub fn new(check: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(check))
    }

    /// Run the predicate once
    pub fn is_healthy(&self) -> bool {
        (self.0)()
    }
}

impl fmt::Debug for HealthCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HealthCheck(..)")
    }
}

/// Core trait for infrastructure resources
///
/// Implementations are plain value descriptions of desired state. The
/// engine never mutates them; adapters downcast through [`Resource::as_any`]
/// to read their concrete fields.
///
/// # Example
///
/// ```
/// use provisioner::{Resource, ResourceId, ResourceKind, ResourceRef};
/// use std::any::Any;
///
/// #[derive(Debug)]
/// struct Network {
///     name: String,
///     ip_range: String,
/// }
///
/// impl Resource for Network {
///     fn id(&self) -> ResourceId {
///         ResourceId::new(ResourceKind::Network, &self.name)
///     }
///
///     fn as_any(&self) -> &dyn Any {
///         self
///     }
/// }
///
/// let network = Network { name: "backbone".into(), ip_range: "10.0.0.0/16".into() };
/// assert_eq!(network.log_name(), "network 'backbone'");
/// assert!(network.infra_parents().is_empty());
/// ```
pub trait Resource: Send + Sync + fmt::Debug + Any {
    /// Stable identity of this resource
    fn id(&self) -> ResourceId;

    /// Kind of this resource, derived from its id by default
    fn kind(&self) -> ResourceKind {
        self.id().kind()
    }

    /// Human-readable name for log lines
    fn log_name(&self) -> String {
        let id = self.id();
        format!("{} '{}'", id.kind(), id.name())
    }

    /// Resources whose remote state this resource structurally depends on
    ///
    /// When any of them changed during a run, this resource's own diff is
    /// not trusted and it gets re-applied.
    fn infra_parents(&self) -> Vec<ResourceRef> {
        Vec::new()
    }

    /// Optional health predicate gating dependent resource groups
    fn health_check(&self) -> Option<HealthCheck> {
        None
    }

    /// Access to the concrete type for adapters
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a type-erased resource
pub type ResourceRef = Arc<dyn Resource>;

/// Downcast a resource to the concrete type an adapter expects
pub fn downcast<T: Resource>(resource: &dyn Resource) -> Option<&T> {
    resource.as_any().downcast_ref::<T>()
}

/// Every ancestor of a resource (parents, their parents, ...)
///
/// Duplicates are removed; order is breadth-first discovery order.
pub fn all_infra_parents(resource: &dyn Resource) -> Vec<ResourceRef> {
    let mut seen = HashSet::new();
    let mut result = Vec::new();
    let mut queue = resource.infra_parents();

    while !queue.is_empty() {
        let mut next = Vec::new();
        for parent in queue {
            if seen.insert(parent.id()) {
                next.extend(parent.infra_parents());
                result.push(parent);
            }
        }
        queue = next;
    }

    result
}
