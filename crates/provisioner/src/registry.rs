//! Adapter traits and dispatch by resource kind
//!
//! Each resource kind is handled by exactly one adapter. Adapters register
//! themselves once at startup; the engine looks them up by
//! [`ResourceKind`] on every operation and never mutates the registry.

use crate::diff::ResourceDiff;
use crate::outcome::Outcome;
use crate::resource::{ResourceKind, ResourceRef, RuntimeState};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Source of observed remote state for one resource kind
pub trait ResourceLookup: Send + Sync {
    /// The kind this data source serves
    fn kind(&self) -> ResourceKind;

    /// Fetch the observed remote state of a resource
    ///
    /// A resource that does not exist remotely is an empty outcome, not a
    /// failure.
    fn lookup(&self, resource: &ResourceRef) -> Outcome<RuntimeState>;
}

/// Adapter that converges one resource kind
///
/// Failures are reported through [`Outcome`] (or `false` for destroys),
/// never by panicking. The engine still guards every call and treats a
/// panic as a failure of that operation.
pub trait InfrastructureProvisioner: ResourceLookup {
    /// Compare desired and observed state
    fn diff(&self, resource: &ResourceRef) -> Outcome<ResourceDiff>;

    /// Create or update the remote resource to match desired state
    fn apply(&self, resource: &ResourceRef) -> Outcome<()>;

    /// Remove one remote resource
    fn destroy(&self, resource: &ResourceRef) -> bool;

    /// Remove every remote resource of this kind
    fn destroy_all(&self) -> bool;
}

/// Mapping from resource kind to its adapter and data source
#[derive(Default)]
pub struct ProvisionerRegistry {
    provisioners: BTreeMap<ResourceKind, Arc<dyn InfrastructureProvisioner>>,
    datasources: BTreeMap<ResourceKind, Arc<dyn ResourceLookup>>,
}

impl ProvisionerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter for its kind
    ///
    /// The adapter also becomes the kind's data source unless a dedicated
    /// one was registered. A later registration for the same kind replaces
    /// the earlier one.
    pub fn register_provisioner<P>(&mut self, provisioner: P) -> &mut Self
    where
        P: InfrastructureProvisioner + 'static,
    {
        let provisioner: Arc<dyn InfrastructureProvisioner> = Arc::new(provisioner);
        let kind = provisioner.kind();
        log::debug!("registering provisioner for '{kind}'");

        if !self.datasources.contains_key(&kind) {
            let lookup = provisioner.clone();
            self.datasources.insert(kind, Arc::new(ProvisionerLookup(lookup)));
        }
        self.provisioners.insert(kind, provisioner);
        self
    }

    /// Register a dedicated data source for its kind
    pub fn register_datasource<D>(&mut self, datasource: D) -> &mut Self
    where
        D: ResourceLookup + 'static,
    {
        let kind = datasource.kind();
        log::debug!("registering datasource for '{kind}'");
        self.datasources.insert(kind, Arc::new(datasource));
        self
    }

    /// Adapter for a kind, if registered
    pub fn try_provisioner(&self, kind: ResourceKind) -> Option<&dyn InfrastructureProvisioner> {
        self.provisioners.get(&kind).map(AsRef::as_ref)
    }

    /// Adapter for a kind
    ///
    /// # Panics
    ///
    /// Panics when no adapter is registered for `kind`. Every kind the
    /// caller hands to the engine must have been registered at startup.
    pub fn provisioner(&self, kind: ResourceKind) -> &dyn InfrastructureProvisioner {
        self.try_provisioner(kind)
            .unwrap_or_else(|| panic!("no provisioner registered for resource kind '{kind}'"))
    }

    /// Data source for a kind, if registered
    pub fn try_datasource(&self, kind: ResourceKind) -> Option<&dyn ResourceLookup> {
        self.datasources.get(&kind).map(AsRef::as_ref)
    }

    /// Data source for a kind
    ///
    /// # Panics
    ///
    /// Panics when no data source is registered for `kind`.
    pub fn datasource(&self, kind: ResourceKind) -> &dyn ResourceLookup {
        self.try_datasource(kind)
            .unwrap_or_else(|| panic!("no datasource registered for resource kind '{kind}'"))
    }

    /// Kinds that have an adapter
    pub fn kinds(&self) -> Vec<ResourceKind> {
        self.provisioners.keys().copied().collect()
    }
}

/// Exposes a registered adapter as its kind's data source
struct ProvisionerLookup(Arc<dyn InfrastructureProvisioner>);

impl ResourceLookup for ProvisionerLookup {
    fn kind(&self) -> ResourceKind {
        self.0.kind()
    }

    fn lookup(&self, resource: &ResourceRef) -> Outcome<RuntimeState> {
        self.0.lookup(resource)
    }
}
