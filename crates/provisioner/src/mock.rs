//! In-memory resources and adapter for testing without remote systems
//!
//! [`MockProvisioner`] records every call it receives into a shared
//! [`CallJournal`], so tests can assert how often and in which order the
//! engine touched each resource.
//!
//! ```
//! use provisioner::mock::{CallJournal, MockProvisioner, MockResource};
//! use provisioner::{Provisioner, ProvisionerRegistry, Resource};
//! use std::sync::Arc;
//!
//! let journal = CallJournal::new();
//! let mock = MockProvisioner::new(journal.clone());
//! let resource = Arc::new(MockResource::new("db"));
//! mock.diff_is_missing(&resource.id());
//!
//! let mut registry = ProvisionerRegistry::new();
//! registry.register_provisioner(mock);
//!
//! let mut provisioner = Provisioner::new(Arc::new(registry));
//! let group = provisioner.create_resource_group("layer1", vec![]).unwrap();
//! group.add_resource(resource.clone());
//!
//! assert!(provisioner.apply());
//! assert_eq!(journal.apply_count(&resource.id()), 1);
//! ```

use crate::diff::{ResourceDiff, ResourceDiffItem};
use crate::outcome::Outcome;
use crate::registry::{InfrastructureProvisioner, ResourceLookup};
use crate::resource::{HealthCheck, Resource, ResourceId, ResourceKind, ResourceRef, RuntimeState};
use std::any::Any;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

const MOCK_KIND: ResourceKind = ResourceKind::Custom("mock");

/// A resource with configurable kind, parents and health check
#[derive(Debug, Clone)]
pub struct MockResource {
    name: String,
    kind: ResourceKind,
    parents: Vec<ResourceRef>,
    health_check: Option<HealthCheck>,
}

impl MockResource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MOCK_KIND,
            parents: Vec::new(),
            health_check: None,
        }
    }

    pub fn with_kind(mut self, kind: ResourceKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_parent(mut self, parent: ResourceRef) -> Self {
        self.parents.push(parent);
        self
    }

    pub fn with_health_check(mut self, check: HealthCheck) -> Self {
        self.health_check = Some(check);
        self
    }
}

impl Resource for MockResource {
    fn id(&self) -> ResourceId {
        ResourceId::new(self.kind, &self.name)
    }

    fn infra_parents(&self) -> Vec<ResourceRef> {
        self.parents.clone()
    }

    fn health_check(&self) -> Option<HealthCheck> {
        self.health_check.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// One adapter call recorded by [`MockProvisioner`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Lookup(ResourceId),
    Diff(ResourceId),
    Apply(ResourceId),
    Destroy(ResourceId),
    DestroyAll(ResourceKind),
}

/// Shared, ordered log of adapter calls
#[derive(Debug, Clone, Default)]
pub struct CallJournal {
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl CallJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, call: MockCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    /// Every call so far, in order
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn count(&self, matches: impl Fn(&MockCall) -> bool) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| matches(c))
            .count()
    }

    pub fn lookup_count(&self, id: &ResourceId) -> usize {
        self.count(|c| matches!(c, MockCall::Lookup(i) if i == id))
    }

    pub fn diff_count(&self, id: &ResourceId) -> usize {
        self.count(|c| matches!(c, MockCall::Diff(i) if i == id))
    }

    pub fn apply_count(&self, id: &ResourceId) -> usize {
        self.count(|c| matches!(c, MockCall::Apply(i) if i == id))
    }

    pub fn destroy_count(&self, id: &ResourceId) -> usize {
        self.count(|c| matches!(c, MockCall::Destroy(i) if i == id))
    }

    /// Number of apply calls across all resources
    pub fn total_applies(&self) -> usize {
        self.count(|c| matches!(c, MockCall::Apply(_)))
    }

    /// Kinds torn down with `destroy_all`, in call order
    pub fn destroyed_kinds(&self) -> Vec<ResourceKind> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::DestroyAll(kind) => Some(kind),
                _ => None,
            })
            .collect()
    }

    pub fn reset(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[derive(Debug, Default)]
struct Behaviour {
    fail_on_lookup: HashSet<ResourceId>,
    fail_on_diff: HashSet<ResourceId>,
    panic_on_diff: HashSet<ResourceId>,
    fail_on_apply: HashSet<ResourceId>,
    panic_on_apply: HashSet<ResourceId>,
    fail_on_destroy: HashSet<ResourceId>,
    diff_is_missing: HashSet<ResourceId>,
    diff_is_changed: HashSet<ResourceId>,
    diff_needs_recreate: HashSet<ResourceId>,
    fail_on_destroy_all: bool,
}

/// Adapter whose behaviour per resource is configured by the test
///
/// By default every resource exists remotely, has no changes, and every
/// apply and destroy succeeds.
#[derive(Debug)]
pub struct MockProvisioner {
    kind: ResourceKind,
    journal: CallJournal,
    behaviour: Mutex<Behaviour>,
}

impl MockProvisioner {
    pub fn new(journal: CallJournal) -> Self {
        Self {
            kind: MOCK_KIND,
            journal,
            behaviour: Mutex::new(Behaviour::default()),
        }
    }

    pub fn with_kind(mut self, kind: ResourceKind) -> Self {
        self.kind = kind;
        self
    }

    fn configure(&self, f: impl FnOnce(&mut Behaviour)) {
        f(&mut self.behaviour.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn check(&self, f: impl FnOnce(&Behaviour) -> bool) -> bool {
        f(&self.behaviour.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn fail_on_lookup(&self, id: &ResourceId) {
        self.configure(|b| {
            b.fail_on_lookup.insert(id.clone());
        });
    }

    pub fn fail_on_diff(&self, id: &ResourceId) {
        self.configure(|b| {
            b.fail_on_diff.insert(id.clone());
        });
    }

    /// Make the diff for `id` panic, simulating an unexpected adapter error
    pub fn panic_on_diff(&self, id: &ResourceId) {
        self.configure(|b| {
            b.panic_on_diff.insert(id.clone());
        });
    }

    pub fn fail_on_apply(&self, id: &ResourceId) {
        self.configure(|b| {
            b.fail_on_apply.insert(id.clone());
        });
    }

    pub fn panic_on_apply(&self, id: &ResourceId) {
        self.configure(|b| {
            b.panic_on_apply.insert(id.clone());
        });
    }

    pub fn fail_on_destroy(&self, id: &ResourceId) {
        self.configure(|b| {
            b.fail_on_destroy.insert(id.clone());
        });
    }

    pub fn fail_on_destroy_all(&self) {
        self.configure(|b| b.fail_on_destroy_all = true);
    }

    pub fn diff_is_missing(&self, id: &ResourceId) {
        self.configure(|b| {
            b.diff_is_missing.insert(id.clone());
        });
    }

    pub fn diff_is_changed(&self, id: &ResourceId) {
        self.configure(|b| {
            b.diff_is_changed.insert(id.clone());
        });
    }

    pub fn diff_needs_recreate(&self, id: &ResourceId) {
        self.configure(|b| {
            b.diff_needs_recreate.insert(id.clone());
        });
    }

    /// Forget all configured behaviour
    pub fn reset(&self) {
        self.configure(|b| *b = Behaviour::default());
    }
}

impl ResourceLookup for MockProvisioner {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn lookup(&self, resource: &ResourceRef) -> Outcome<RuntimeState> {
        let id = resource.id();
        self.journal.record(MockCall::Lookup(id.clone()));

        if self.check(|b| b.fail_on_lookup.contains(&id)) {
            return Outcome::failure(format!("lookup for {id} failed"));
        }
        if self.check(|b| b.diff_is_missing.contains(&id)) {
            return Outcome::empty();
        }
        Outcome::of(serde_json::json!({ "name": id.name() }))
    }
}

impl InfrastructureProvisioner for MockProvisioner {
    fn diff(&self, resource: &ResourceRef) -> Outcome<ResourceDiff> {
        let id = resource.id();
        self.journal.record(MockCall::Diff(id.clone()));

        if self.check(|b| b.panic_on_diff.contains(&id)) {
            panic!("diff for {id} blew up");
        }
        if self.check(|b| b.fail_on_diff.contains(&id)) {
            return Outcome::failure(format!("diff for {id} failed"));
        }

        self.lookup(resource).map_or_else_missing(
            |_state| {
                let mut changes = Vec::new();
                if self.check(|b| b.diff_is_changed.contains(&id)) {
                    changes.push(ResourceDiffItem::changed("value"));
                }
                if self.check(|b| b.diff_needs_recreate.contains(&id)) {
                    changes.push(ResourceDiffItem::recreate("immutable"));
                }
                ResourceDiff::with_changes(resource.clone(), changes)
            },
            || ResourceDiff::missing(resource.clone()),
        )
    }

    fn apply(&self, resource: &ResourceRef) -> Outcome<()> {
        let id = resource.id();
        self.journal.record(MockCall::Apply(id.clone()));

        if self.check(|b| b.panic_on_apply.contains(&id)) {
            panic!("apply for {id} blew up");
        }
        if self.check(|b| b.fail_on_apply.contains(&id)) {
            return Outcome::failure(format!("apply for {id} failed"));
        }
        Outcome::of(())
    }

    fn destroy(&self, resource: &ResourceRef) -> bool {
        let id = resource.id();
        self.journal.record(MockCall::Destroy(id.clone()));
        !self.check(|b| b.fail_on_destroy.contains(&id))
    }

    fn destroy_all(&self) -> bool {
        self.journal.record(MockCall::DestroyAll(self.kind));
        !self.check(|b| b.fail_on_destroy_all)
    }
}
