//! Reconciliation engine - diffs resource groups in order and converges them
//!
//! A run walks the registered groups in registration order. For each group
//! it waits for the health checks of the groups it depends on, computes a
//! diff per resource (treating resources below a changed parent as missing)
//! and then executes one destroy-then-apply batch. The first failure at any
//! step aborts the whole run.

use crate::diff::{ResourceDiff, changed_or_missing};
use crate::error::{ProvisionError, RegistrationError};
use crate::group::ResourceGroup;
use crate::outcome::Outcome;
use crate::registry::{InfrastructureProvisioner, ProvisionerRegistry};
use crate::resource::{ResourceId, ResourceKind, ResourceRef, RuntimeState, all_infra_parents};
use crate::retry::{RetryPolicy, retry_while_unhealthy};
use log::{error, info};
use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Diffs computed for one group by [`Provisioner::plan`]
#[derive(Debug, Clone)]
pub struct GroupPlan {
    /// Name of the resource group
    pub group: String,
    /// The group's own diffs followed by synthesized parent-change entries
    pub diffs: Vec<ResourceDiff>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HealthChecks {
    Run,
    Skip,
}

/// Kinds torn down by [`Provisioner::destroy_all`], in order
///
/// Dependents go before what they depend on: assignments before the
/// floating IPs they bind, servers before the volumes and networks they
/// are attached to.
pub fn teardown_order(destroy_volumes: bool) -> Vec<ResourceKind> {
    let mut kinds = vec![ResourceKind::FloatingIpAssignment, ResourceKind::Server];
    if destroy_volumes {
        kinds.push(ResourceKind::Volume);
    }
    kinds.extend([
        ResourceKind::Network,
        ResourceKind::SshKey,
        ResourceKind::FloatingIp,
    ]);
    kinds
}

/// The reconciliation engine
///
/// Owns the registered resource groups (kept until [`Provisioner::clear`])
/// and the set of resources applied during the current run (reset at the
/// start of every [`Provisioner::apply`]). Runs on one instance must not
/// overlap; `apply` takes `&mut self` for that reason.
pub struct Provisioner {
    registry: Arc<ProvisionerRegistry>,
    resource_groups: Vec<ResourceGroup>,
    applied_resources: Vec<ResourceId>,
    health_check_retry: RetryPolicy,
}

impl Provisioner {
    /// Create an engine dispatching to the given registry
    pub fn new(registry: Arc<ProvisionerRegistry>) -> Self {
        Self {
            registry,
            resource_groups: Vec::new(),
            applied_resources: Vec::new(),
            health_check_retry: RetryPolicy::health_check(),
        }
    }

    /// Override the retry policy used for gating health checks
    pub fn with_health_check_retry(mut self, policy: RetryPolicy) -> Self {
        self.health_check_retry = policy;
        self
    }

    pub fn health_check_retry(&self) -> &RetryPolicy {
        &self.health_check_retry
    }

    pub fn registry(&self) -> &ProvisionerRegistry {
        &self.registry
    }

    // =========================================================================
    // Group registration
    // =========================================================================

    /// Create and register a new resource group
    ///
    /// Every group in `depends_on` must already be registered with this
    /// engine; groups are processed in registration order and never
    /// reordered.
    pub fn create_resource_group(
        &mut self,
        name: impl Into<String>,
        depends_on: Vec<ResourceGroup>,
    ) -> Result<ResourceGroup, RegistrationError> {
        let group = ResourceGroup::new(name, depends_on);
        self.add_resource_group(group.clone())?;
        Ok(group)
    }

    /// Register a pre-built resource group
    pub fn add_resource_group(&mut self, group: ResourceGroup) -> Result<(), RegistrationError> {
        if self.resource_groups.iter().any(|g| g.name() == group.name()) {
            return Err(RegistrationError::DuplicateGroup(group.name().to_string()));
        }

        if let Some(dependency) = group
            .depends_on()
            .iter()
            .find(|dep| !self.resource_groups.iter().any(|g| g.same_group(dep)))
        {
            return Err(RegistrationError::UnknownDependency {
                group: group.name().to_string(),
                dependency: dependency.name().to_string(),
            });
        }

        self.resource_groups.push(group);
        Ok(())
    }

    /// Registered groups in processing order
    pub fn resource_groups(&self) -> &[ResourceGroup] {
        &self.resource_groups
    }

    /// Forget all registered groups and the applied set of the last run
    pub fn clear(&mut self) {
        self.resource_groups.clear();
        self.applied_resources.clear();
    }

    // =========================================================================
    // Registry pass-through
    // =========================================================================

    /// Look up the observed remote state of a resource
    ///
    /// An adapter panic is logged and reported as a failed outcome.
    pub fn lookup(&self, resource: &ResourceRef) -> Outcome<RuntimeState> {
        let datasource = self.registry.datasource(resource.kind());
        match guarded(|| datasource.lookup(resource)) {
            Ok(outcome) => outcome,
            Err(message) => {
                error!("lookup for {} failed: {message}", resource.log_name());
                Outcome::failure(message)
            }
        }
    }

    /// Adapter responsible for a resource
    ///
    /// # Panics
    ///
    /// Panics when the resource's kind has no registered adapter.
    pub fn provisioner(&self, resource: &ResourceRef) -> &dyn InfrastructureProvisioner {
        self.registry.provisioner(resource.kind())
    }

    /// Resources applied so far in the current (or last) run
    pub fn applied_resources(&self) -> &[ResourceId] {
        &self.applied_resources
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Run one full reconciliation pass over all registered groups
    ///
    /// Returns `true` only if every group's diff and batch succeeded. The
    /// cause of a failure is logged; use [`Provisioner::try_apply`] to get it
    /// as a value.
    ///
    /// # Panics
    ///
    /// Panics when a registered resource's kind has no adapter.
    pub fn apply(&mut self) -> bool {
        match self.try_apply() {
            Ok(()) => true,
            Err(e) => {
                error!("run aborted while {}: {e}", e.stage().description());
                false
            }
        }
    }

    /// Like [`Provisioner::apply`], returning the error that aborted the run
    pub fn try_apply(&mut self) -> Result<(), ProvisionError> {
        self.applied_resources.clear();

        info!(
            "applying resource groups {}",
            self.resource_groups
                .iter()
                .map(ResourceGroup::name)
                .collect::<Vec<_>>()
                .join(", ")
        );

        let groups = self.resource_groups.clone();
        let mut all_diffs: Vec<ResourceDiff> = Vec::new();

        for group in &groups {
            let diffs = self.diff_for_resource_group(group, &all_diffs, HealthChecks::Run)?;
            log_group_diffs(group, &diffs);

            all_diffs.extend(diffs.iter().cloned());
            let batch = with_parent_changes(group, diffs, &all_diffs);

            self.apply_batch(&batch)?;
        }

        Ok(())
    }

    /// Compute what a run would do without changing anything
    ///
    /// Diffs every group in order, propagating changed and missing
    /// resources exactly like [`Provisioner::apply`], but runs no health
    /// checks and never calls apply or destroy.
    pub fn plan(&self) -> Result<Vec<GroupPlan>, ProvisionError> {
        let mut all_diffs: Vec<ResourceDiff> = Vec::new();
        let mut plans = Vec::with_capacity(self.resource_groups.len());

        for group in &self.resource_groups {
            let diffs = self.diff_for_resource_group(group, &all_diffs, HealthChecks::Skip)?;
            all_diffs.extend(diffs.iter().cloned());

            plans.push(GroupPlan {
                group: group.name().to_string(),
                diffs: with_parent_changes(group, diffs, &all_diffs),
            });
        }

        Ok(plans)
    }

    /// Wait for the health checks of every group `group` depends on
    fn await_parent_groups(
        &self,
        group: &ResourceGroup,
        changed: &HashSet<ResourceId>,
    ) -> Result<(), ProvisionError> {
        let mut group_changed_parents: Vec<ResourceId> = Vec::new();
        for resource in group.resources() {
            for parent in all_infra_parents(resource.as_ref()) {
                let id = parent.id();
                if changed.contains(&id) && !group_changed_parents.contains(&id) {
                    group_changed_parents.push(id);
                }
            }
        }

        for parent_group in group.depends_on() {
            if !group_changed_parents.is_empty() {
                info!(
                    "skipping healthcheck for resource group '{}' the following dependencies were missing or changed: {}",
                    group.name(),
                    join_ids(&group_changed_parents)
                );
                continue;
            }

            for resource in parent_group.resources() {
                let Some(check) = resource.health_check() else {
                    continue;
                };

                let pending: Vec<ResourceId> = all_infra_parents(resource.as_ref())
                    .iter()
                    .map(|p| p.id())
                    .filter(|id| changed.contains(id))
                    .collect();

                if !pending.is_empty() {
                    info!(
                        "skipping healthcheck for {} the following dependencies were missing or changed: {}",
                        resource.id(),
                        join_ids(&pending)
                    );
                    continue;
                }

                info!("running healthcheck for {}", resource.log_name());

                let policy = self.health_check_retry;
                if !retry_while_unhealthy(&policy, &check) {
                    error!("healthcheck for {} failed", resource.log_name());
                    return Err(ProvisionError::HealthCheckExhausted {
                        group: group.name().to_string(),
                        resource: resource.id(),
                        attempts: policy.max_attempts.max(1),
                    });
                }
            }
        }

        Ok(())
    }

    /// Diff every resource of a group
    ///
    /// `previous` holds the diffs of all groups processed earlier in this
    /// run. A resource with a changed or missing ancestor, or following a
    /// changed or missing resource in this group, is recorded as missing
    /// without asking its adapter.
    fn diff_for_resource_group(
        &self,
        group: &ResourceGroup,
        previous: &[ResourceDiff],
        health_checks: HealthChecks,
    ) -> Result<Vec<ResourceDiff>, ProvisionError> {
        info!("creating diff for resource group '{}'", group.name());

        let changed = changed_or_missing(previous);

        if health_checks == HealthChecks::Run {
            self.await_parent_groups(group, &changed)?;
        }

        let mut result: Vec<ResourceDiff> = Vec::new();

        for resource in group.distinct_resources() {
            let mut missing_or_changed: Vec<ResourceId> = all_infra_parents(resource.as_ref())
                .iter()
                .map(|p| p.id())
                .filter(|id| changed.contains(id))
                .collect();
            missing_or_changed.extend(
                result
                    .iter()
                    .filter(|d| d.has_changes_or_missing())
                    .map(|d| d.resource.id()),
            );

            if !missing_or_changed.is_empty() {
                info!(
                    "skipping diff for {} the following dependencies were missing or changed: {}",
                    resource.id(),
                    join_ids(&missing_or_changed)
                );
                result.push(ResourceDiff::missing(resource));
                continue;
            }

            info!("creating diff for {}", resource.log_name());

            let provisioner = self.registry.provisioner(resource.kind());
            let outcome = match guarded(|| provisioner.diff(&resource)) {
                Ok(outcome) => outcome,
                Err(message) => {
                    error!("diff failed for resource {}: {message}", resource.log_name());
                    return Err(diff_error(group, &resource, message));
                }
            };

            if outcome.is_failed() {
                let message = outcome.error_message();
                error!("diff failed for {}: {message}", resource.log_name());
                return Err(diff_error(group, &resource, message));
            }

            match outcome.into_result() {
                Some(diff) => result.push(diff),
                None => {
                    error!("diff for {} returned no result", resource.log_name());
                    return Err(diff_error(group, &resource, "adapter returned no diff"));
                }
            }
        }

        Ok(result)
    }

    /// Destroy everything that needs recreation, then apply all changes
    fn apply_batch(&mut self, diffs: &[ResourceDiff]) -> Result<(), ProvisionError> {
        for diff in diffs.iter().filter(|d| d.needs_recreate()) {
            let resource = &diff.resource;
            info!("destroying {}", resource.log_name());

            let provisioner = self.registry.provisioner(resource.kind());
            let destroyed = match guarded(|| provisioner.destroy(resource)) {
                Ok(destroyed) => destroyed,
                Err(message) => {
                    error!("destroy panicked for {}: {message}", resource.log_name());
                    false
                }
            };

            if !destroyed {
                error!("destroying {} failed", resource.log_name());
                return Err(ProvisionError::Destroy {
                    resource: resource.id(),
                });
            }
        }

        for diff in diffs.iter().filter(|d| d.has_changes_or_missing()) {
            let resource = &diff.resource;
            let id = resource.id();

            if self.applied_resources.contains(&id) {
                info!("{} already applied", resource.log_name());
                continue;
            }

            info!("applying {}", resource.log_name());

            let provisioner = self.registry.provisioner(resource.kind());
            match guarded(|| provisioner.apply(resource)) {
                Ok(outcome) if outcome.is_failed() => {
                    let message = outcome.error_message();
                    error!(
                        "applying {} failed, result was: '{message}'",
                        resource.log_name()
                    );
                    return Err(ProvisionError::Apply {
                        resource: id,
                        message,
                    });
                }
                Ok(_) => self.applied_resources.push(id),
                Err(message) => {
                    error!("apply failed for resource {}: {message}", resource.log_name());
                    return Err(ProvisionError::Apply {
                        resource: id,
                        message,
                    });
                }
            }
        }

        Ok(())
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Destroy every managed resource, kind by kind
    ///
    /// Follows [`teardown_order`]; volumes are only destroyed when
    /// `destroy_volumes` is set. Stops at the first kind that fails.
    ///
    /// # Panics
    ///
    /// Panics when one of the teardown kinds has no registered adapter.
    pub fn destroy_all(&self, destroy_volumes: bool) -> bool {
        match self.try_destroy_all(destroy_volumes) {
            Ok(()) => true,
            Err(e) => {
                error!("teardown aborted: {e}");
                false
            }
        }
    }

    /// Like [`Provisioner::destroy_all`], returning the failing kind
    pub fn try_destroy_all(&self, destroy_volumes: bool) -> Result<(), ProvisionError> {
        for kind in teardown_order(destroy_volumes) {
            info!("destroying all resources of kind '{kind}'");

            let provisioner = self.registry.provisioner(kind);
            let destroyed = match guarded(|| provisioner.destroy_all()) {
                Ok(destroyed) => destroyed,
                Err(message) => {
                    error!("destroying all '{kind}' panicked: {message}");
                    false
                }
            };

            if !destroyed {
                return Err(ProvisionError::DestroyAll { kind });
            }
        }

        Ok(())
    }
}

/// Append a parent-changed diff for every resource of `group` whose direct
/// infra parent changed or went missing in any group processed so far
fn with_parent_changes(
    group: &ResourceGroup,
    mut diffs: Vec<ResourceDiff>,
    all_diffs: &[ResourceDiff],
) -> Vec<ResourceDiff> {
    let changed = changed_or_missing(all_diffs);

    let parent_changes: Vec<ResourceDiff> = group
        .resources()
        .into_iter()
        .filter(|r| r.infra_parents().iter().any(|p| changed.contains(&p.id())))
        .map(ResourceDiff::parent_changed)
        .collect();

    diffs.extend(parent_changes);
    diffs
}

fn log_group_diffs(group: &ResourceGroup, diffs: &[ResourceDiff]) {
    let changed: Vec<String> = diffs
        .iter()
        .filter(|d| d.has_changes())
        .map(ToString::to_string)
        .collect();
    let missing: Vec<String> = diffs
        .iter()
        .filter(|d| d.is_missing())
        .map(|d| d.resource.id().to_string())
        .collect();

    info!(
        "resource group '{}', changed resources: {}, missing resources: {}",
        group.name(),
        changed.join(", "),
        missing.join(", ")
    );
}

fn diff_error(group: &ResourceGroup, resource: &ResourceRef, message: impl Into<String>) -> ProvisionError {
    ProvisionError::Diff {
        group: group.name().to_string(),
        resource: resource.id(),
        message: message.into(),
    }
}

fn join_ids(ids: &[ResourceId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Run an adapter call, turning a panic into an error message
fn guarded<T>(op: impl FnOnce() -> T) -> Result<T, String> {
    panic::catch_unwind(AssertUnwindSafe(op)).map_err(|payload| panic_message(payload.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "adapter panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureStage;
    use crate::mock::{CallJournal, MockCall, MockProvisioner, MockResource};
    use crate::registry::ResourceLookup;
    use crate::resource::HealthCheck;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Fixture {
        provisioner: Provisioner,
        mock: Arc<MockProvisioner>,
        journal: CallJournal,
    }

    /// Registry adapter that forwards to a shared mock, so tests can keep
    /// configuring the mock after it was registered
    struct SharedMock(Arc<MockProvisioner>);

    impl ResourceLookup for SharedMock {
        fn kind(&self) -> ResourceKind {
            self.0.kind()
        }

        fn lookup(&self, resource: &ResourceRef) -> Outcome<RuntimeState> {
            self.0.lookup(resource)
        }
    }

    impl InfrastructureProvisioner for SharedMock {
        fn diff(&self, resource: &ResourceRef) -> Outcome<ResourceDiff> {
            self.0.diff(resource)
        }

        fn apply(&self, resource: &ResourceRef) -> Outcome<()> {
            self.0.apply(resource)
        }

        fn destroy(&self, resource: &ResourceRef) -> bool {
            self.0.destroy(resource)
        }

        fn destroy_all(&self) -> bool {
            self.0.destroy_all()
        }
    }

    fn fixture() -> Fixture {
        let journal = CallJournal::new();
        let mock = Arc::new(MockProvisioner::new(journal.clone()));

        let mut registry = ProvisionerRegistry::new();
        registry.register_provisioner(SharedMock(mock.clone()));

        let provisioner = Provisioner::new(Arc::new(registry))
            .with_health_check_retry(RetryPolicy::new(15, Duration::from_millis(1)));

        Fixture {
            provisioner,
            mock,
            journal,
        }
    }

    fn resource(name: &str) -> ResourceRef {
        Arc::new(MockResource::new(name))
    }

    fn child(name: &str, parent: &ResourceRef) -> ResourceRef {
        Arc::new(MockResource::new(name).with_parent(parent.clone()))
    }

    fn counting_check(healthy: bool) -> (HealthCheck, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let check = HealthCheck::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            healthy
        });
        (check, calls)
    }

    #[test]
    fn test_handles_failing_resource_lookups() {
        let f = fixture();
        let r = resource("r1");
        f.mock.fail_on_lookup(&r.id());

        let result = f.provisioner.lookup(&r);

        assert!(result.is_empty_or_failed());
        assert_eq!(f.journal.lookup_count(&r.id()), 1);
    }

    #[test]
    fn test_apply_fails_when_lookup_fails() {
        let mut f = fixture();
        let r = resource("r1");
        f.mock.fail_on_lookup(&r.id());
        f.provisioner
            .create_resource_group("layer1", vec![])
            .unwrap()
            .add_resource(r.clone());

        assert!(!f.provisioner.apply());
        assert_eq!(f.journal.lookup_count(&r.id()), 1);
    }

    #[test]
    fn test_resources_are_applied_when_parent_changes() {
        let mut f = fixture();
        let r1 = resource("r1");
        let r2 = child("r2", &r1);
        f.mock.diff_is_missing(&r1.id());

        let layer = f.provisioner.create_resource_group("layer1", vec![]).unwrap();
        layer.add_resource(r1.clone()).add_resource(r2.clone());

        assert!(f.provisioner.apply());
        assert_eq!(f.journal.apply_count(&r1.id()), 1);
        assert_eq!(f.journal.apply_count(&r2.id()), 1);
    }

    #[test]
    fn test_diff_is_omitted_when_parents_are_missing() {
        let mut f = fixture();
        let r1 = resource("r1");
        let r2 = child("r2", &r1);
        f.mock.diff_is_missing(&r1.id());

        let layer = f.provisioner.create_resource_group("layer1", vec![]).unwrap();
        layer.add_resource(r1.clone()).add_resource(r2.clone());

        assert!(f.provisioner.apply());
        assert_eq!(f.journal.diff_count(&r2.id()), 0);
    }

    #[test]
    fn test_diff_is_omitted_after_any_changed_resource_in_group() {
        let mut f = fixture();
        let r1 = resource("r1");
        let unrelated = resource("unrelated");
        f.mock.diff_is_changed(&r1.id());

        let layer = f.provisioner.create_resource_group("layer1", vec![]).unwrap();
        layer.add_resource(r1.clone()).add_resource(unrelated.clone());

        let plans = f.provisioner.plan().unwrap();
        assert!(plans[0].diffs[1].is_missing());
        assert_eq!(f.journal.diff_count(&unrelated.id()), 0);
    }

    #[test]
    fn test_handles_failing_resource_diffs() {
        let mut f = fixture();
        let r = resource("r1");
        f.mock.fail_on_diff(&r.id());
        f.provisioner
            .create_resource_group("layer1", vec![])
            .unwrap()
            .add_resource(r.clone());

        assert!(!f.provisioner.apply());
        assert_eq!(f.journal.diff_count(&r.id()), 1);
    }

    #[test]
    fn test_panicking_diff_aborts_without_any_apply() {
        let mut f = fixture();
        let r1 = resource("r1");
        let r2 = resource("r2");
        f.mock.panic_on_diff(&r1.id());
        f.mock.diff_is_missing(&r2.id());

        let first = f.provisioner.create_resource_group("first", vec![]).unwrap();
        first.add_resource(r1.clone());
        let second = f.provisioner.create_resource_group("second", vec![]).unwrap();
        second.add_resource(r2.clone());

        let err = f.provisioner.try_apply().unwrap_err();
        assert_eq!(err.stage(), FailureStage::Diff);
        assert_eq!(f.journal.total_applies(), 0);
        assert_eq!(f.journal.diff_count(&r2.id()), 0);
    }

    #[test]
    fn test_handles_failing_resource_apply() {
        let mut f = fixture();
        let r = resource("r1");
        f.mock.fail_on_apply(&r.id());
        f.mock.diff_is_missing(&r.id());
        f.provisioner
            .create_resource_group("layer1", vec![])
            .unwrap()
            .add_resource(r.clone());

        assert!(!f.provisioner.apply());
        assert_eq!(f.journal.apply_count(&r.id()), 1);
        assert!(f.provisioner.applied_resources().is_empty());
    }

    #[test]
    fn test_panicking_apply_is_a_failure() {
        let mut f = fixture();
        let r = resource("r1");
        f.mock.panic_on_apply(&r.id());
        f.mock.diff_is_changed(&r.id());
        f.provisioner
            .create_resource_group("layer1", vec![])
            .unwrap()
            .add_resource(r.clone());

        let err = f.provisioner.try_apply().unwrap_err();
        assert!(matches!(err, ProvisionError::Apply { .. }));
    }

    #[test]
    fn test_apply_failure_stops_rest_of_batch_and_later_groups() {
        let mut f = fixture();
        let r1 = resource("r1");
        let r2 = resource("r2");
        let r3 = resource("r3");
        f.mock.diff_is_missing(&r1.id());
        f.mock.fail_on_apply(&r1.id());
        f.mock.diff_is_missing(&r3.id());

        let first = f.provisioner.create_resource_group("first", vec![]).unwrap();
        first.add_resource(r1.clone()).add_resource(r2.clone());
        let second = f.provisioner.create_resource_group("second", vec![]).unwrap();
        second.add_resource(r3.clone());

        assert!(!f.provisioner.apply());
        assert_eq!(f.journal.apply_count(&r2.id()), 0);
        assert_eq!(f.journal.diff_count(&r3.id()), 0);
        assert_eq!(f.journal.apply_count(&r3.id()), 0);
    }

    #[test]
    fn test_unchanged_child_is_reapplied_when_parent_in_earlier_group_changed() {
        let mut f = fixture();
        let network = resource("network");
        let server = child("server", &network);
        f.mock.diff_is_changed(&network.id());

        let infra = f.provisioner.create_resource_group("infra", vec![]).unwrap();
        infra.add_resource(network.clone());
        let services = f
            .provisioner
            .create_resource_group("services", vec![infra.clone()])
            .unwrap();
        services.add_resource(server.clone());

        assert!(f.provisioner.apply());
        assert_eq!(f.journal.diff_count(&server.id()), 0);
        assert_eq!(f.journal.apply_count(&server.id()), 1);
    }

    #[test]
    fn test_parent_changed_entry_reapplies_child_with_no_own_changes() {
        let mut f = fixture();
        let parent = resource("parent");
        let dependent = child("dependent", &parent);
        f.mock.diff_is_missing(&parent.id());

        // dependent is diffed first and reports no change of its own
        let layer = f.provisioner.create_resource_group("layer1", vec![]).unwrap();
        layer.add_resource(dependent.clone()).add_resource(parent.clone());

        let plans = f.provisioner.plan().unwrap();
        let synthesized = plans[0].diffs.last().unwrap();
        assert_eq!(synthesized.resource.id(), dependent.id());
        assert_eq!(synthesized.changed_attributes(), vec![crate::diff::PARENT_CHANGED]);

        f.journal.reset();
        assert!(f.provisioner.apply());
        assert_eq!(f.journal.diff_count(&dependent.id()), 1);
        assert_eq!(f.journal.apply_count(&dependent.id()), 1);
    }

    #[test]
    fn test_resource_is_applied_once_per_run() {
        let mut f = fixture();
        let r1 = resource("r1");
        let r2 = child("r2", &r1);
        f.mock.diff_is_missing(&r1.id());

        let layer = f.provisioner.create_resource_group("layer1", vec![]).unwrap();
        layer.add_resource(r1.clone()).add_resource(r2.clone());

        assert!(f.provisioner.apply());
        assert_eq!(f.journal.apply_count(&r2.id()), 1);
        assert_eq!(f.provisioner.applied_resources(), &[r1.id(), r2.id()]);
    }

    #[test]
    fn test_applied_set_resets_between_runs() {
        let mut f = fixture();
        let r = resource("r1");
        f.mock.diff_is_missing(&r.id());
        f.provisioner
            .create_resource_group("layer1", vec![])
            .unwrap()
            .add_resource(r.clone());

        assert!(f.provisioner.apply());
        assert!(f.provisioner.apply());
        assert_eq!(f.journal.apply_count(&r.id()), 2);
    }

    #[test]
    fn test_destroy_phase_precedes_apply_phase() {
        let mut f = fixture();
        let r1 = resource("r1");
        let r2 = resource("r2");
        f.mock.diff_needs_recreate(&r1.id());

        let layer = f.provisioner.create_resource_group("layer1", vec![]).unwrap();
        layer.add_resource(r1.clone()).add_resource(r2.clone());

        assert!(f.provisioner.apply());

        let mutations: Vec<MockCall> = f
            .journal
            .calls()
            .into_iter()
            .filter(|c| matches!(c, MockCall::Destroy(_) | MockCall::Apply(_)))
            .collect();
        assert_eq!(
            mutations,
            vec![
                MockCall::Destroy(r1.id()),
                MockCall::Destroy(r2.id()),
                MockCall::Apply(r1.id()),
                MockCall::Apply(r2.id()),
            ]
        );
    }

    #[test]
    fn test_in_place_change_is_not_destroyed() {
        let mut f = fixture();
        let r = resource("r1");
        f.mock.diff_is_changed(&r.id());
        f.provisioner
            .create_resource_group("layer1", vec![])
            .unwrap()
            .add_resource(r.clone());

        assert!(f.provisioner.apply());
        assert_eq!(f.journal.destroy_count(&r.id()), 0);
        assert_eq!(f.journal.apply_count(&r.id()), 1);
    }

    #[test]
    fn test_destroy_failure_aborts_before_apply() {
        let mut f = fixture();
        let r = resource("r1");
        f.mock.diff_needs_recreate(&r.id());
        f.mock.fail_on_destroy(&r.id());
        f.provisioner
            .create_resource_group("layer1", vec![])
            .unwrap()
            .add_resource(r.clone());

        let err = f.provisioner.try_apply().unwrap_err();
        assert!(matches!(err, ProvisionError::Destroy { .. }));
        assert_eq!(f.journal.apply_count(&r.id()), 0);
    }

    #[test]
    fn test_exhausted_health_check_fails_dependent_group() {
        let mut f = fixture();
        let (check, calls) = counting_check(false);
        let gated: ResourceRef = Arc::new(MockResource::new("vault").with_health_check(check));
        let dependent = resource("policy");

        let infra = f.provisioner.create_resource_group("infra", vec![]).unwrap();
        infra.add_resource(gated.clone());
        let services = f
            .provisioner
            .create_resource_group("services", vec![infra.clone()])
            .unwrap();
        services.add_resource(dependent.clone());

        let err = f.provisioner.try_apply().unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::HealthCheckExhausted { attempts: 15, .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 15);
        assert_eq!(f.journal.diff_count(&dependent.id()), 0);
        assert!(!f.provisioner.apply());
    }

    #[test]
    fn test_health_check_skipped_when_its_parents_changed() {
        let mut f = fixture();
        let (check, calls) = counting_check(false);
        let server = resource("server");
        let gated: ResourceRef = Arc::new(
            MockResource::new("vault")
                .with_parent(server.clone())
                .with_health_check(check),
        );
        f.mock.diff_is_missing(&server.id());

        let infra = f.provisioner.create_resource_group("infra", vec![]).unwrap();
        infra.add_resource(server.clone()).add_resource(gated.clone());
        let services = f
            .provisioner
            .create_resource_group("services", vec![infra.clone()])
            .unwrap();
        services.add_resource(resource("policy"));

        assert!(f.provisioner.apply());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_health_check_skipped_when_group_parents_changed() {
        let mut f = fixture();
        let (check, calls) = counting_check(false);
        let gated: ResourceRef = Arc::new(MockResource::new("vault").with_health_check(check));
        let mount = resource("mount");
        f.mock.diff_is_changed(&mount.id());

        let infra = f.provisioner.create_resource_group("infra", vec![]).unwrap();
        infra.add_resource(gated.clone()).add_resource(mount.clone());
        let services = f
            .provisioner
            .create_resource_group("services", vec![infra.clone()])
            .unwrap();
        services.add_resource(child("policy", &mount));

        assert!(f.provisioner.apply());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_passing_health_check_lets_dependent_group_proceed() {
        let mut f = fixture();
        let (check, calls) = counting_check(true);
        let gated: ResourceRef = Arc::new(MockResource::new("vault").with_health_check(check));
        let dependent = resource("policy");
        f.mock.diff_is_missing(&dependent.id());

        let infra = f.provisioner.create_resource_group("infra", vec![]).unwrap();
        infra.add_resource(gated);
        let services = f
            .provisioner
            .create_resource_group("services", vec![infra.clone()])
            .unwrap();
        services.add_resource(dependent.clone());

        assert!(f.provisioner.apply());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.journal.apply_count(&dependent.id()), 1);
    }

    #[test]
    #[should_panic(expected = "no provisioner registered for resource kind 'volume'")]
    fn test_unregistered_kind_is_fatal_for_the_run() {
        let mut f = fixture();
        let volume: ResourceRef = Arc::new(MockResource::new("data").with_kind(ResourceKind::Volume));

        f.provisioner
            .create_resource_group("storage", vec![])
            .unwrap()
            .add_resource(volume);

        let _ = f.provisioner.apply();
    }

    #[test]
    fn test_panicking_health_check_is_retried() {
        let mut f = fixture();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let check = HealthCheck::new(move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            assert!(attempt >= 3, "vault is still starting");
            true
        });
        let gated: ResourceRef = Arc::new(MockResource::new("vault").with_health_check(check));
        let dependent = resource("policy");
        f.mock.diff_is_missing(&dependent.id());

        let infra = f.provisioner.create_resource_group("infra", vec![]).unwrap();
        infra.add_resource(gated);
        let services = f
            .provisioner
            .create_resource_group("services", vec![infra.clone()])
            .unwrap();
        services.add_resource(dependent.clone());

        assert!(f.provisioner.apply());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(f.journal.apply_count(&dependent.id()), 1);
    }

    #[test]
    fn test_health_checks_only_gate_dependent_groups() {
        let mut f = fixture();
        let (check, calls) = counting_check(false);
        let gated: ResourceRef = Arc::new(MockResource::new("vault").with_health_check(check));

        f.provisioner
            .create_resource_group("infra", vec![])
            .unwrap()
            .add_resource(gated);
        f.provisioner
            .create_resource_group("unrelated", vec![])
            .unwrap()
            .add_resource(resource("other"));

        assert!(f.provisioner.apply());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_plan_does_not_apply_or_run_health_checks() {
        let mut f = fixture();
        let (check, calls) = counting_check(false);
        let gated: ResourceRef = Arc::new(MockResource::new("vault").with_health_check(check));
        let r = resource("policy");
        f.mock.diff_is_missing(&r.id());

        let infra = f.provisioner.create_resource_group("infra", vec![]).unwrap();
        infra.add_resource(gated);
        let services = f
            .provisioner
            .create_resource_group("services", vec![infra.clone()])
            .unwrap();
        services.add_resource(r.clone());

        let plans = f.provisioner.plan().unwrap();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[1].group, "services");
        assert!(plans[1].diffs[0].is_missing());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.journal.total_applies(), 0);
    }

    #[test]
    fn test_rejects_unregistered_dependency() {
        let mut f = fixture();
        let stray = ResourceGroup::new("stray", vec![]);

        let err = f
            .provisioner
            .create_resource_group("services", vec![stray])
            .unwrap_err();
        assert_eq!(
            err,
            RegistrationError::UnknownDependency {
                group: "services".to_string(),
                dependency: "stray".to_string(),
            }
        );
        assert!(f.provisioner.resource_groups().is_empty());
    }

    #[test]
    fn test_rejects_duplicate_group() {
        let mut f = fixture();
        f.provisioner.create_resource_group("infra", vec![]).unwrap();

        let err = f
            .provisioner
            .add_resource_group(ResourceGroup::new("infra", vec![]))
            .unwrap_err();
        assert_eq!(err, RegistrationError::DuplicateGroup("infra".to_string()));
    }

    #[test]
    fn test_clear_forgets_groups() {
        let mut f = fixture();
        let r = resource("r1");
        f.mock.diff_is_missing(&r.id());
        f.provisioner
            .create_resource_group("layer1", vec![])
            .unwrap()
            .add_resource(r.clone());

        f.provisioner.clear();

        assert!(f.provisioner.resource_groups().is_empty());
        assert!(f.provisioner.apply());
        assert!(f.journal.calls().is_empty());
    }

    #[test]
    fn test_resources_added_after_registration_are_reconciled() {
        let mut f = fixture();
        let group = ResourceGroup::new("layer1", vec![]);
        f.provisioner.add_resource_group(group.clone()).unwrap();

        let r = resource("late");
        f.mock.diff_is_missing(&r.id());
        group.add_resource(r.clone());

        assert!(f.provisioner.apply());
        assert_eq!(f.journal.apply_count(&r.id()), 1);
    }

    fn teardown_fixture(journal: &CallJournal, failing: Option<ResourceKind>) -> Provisioner {
        let mut registry = ProvisionerRegistry::new();
        for kind in teardown_order(true) {
            let mock = MockProvisioner::new(journal.clone()).with_kind(kind);
            if failing == Some(kind) {
                mock.fail_on_destroy_all();
            }
            registry.register_provisioner(mock);
        }
        Provisioner::new(Arc::new(registry))
    }

    #[test]
    fn test_destroy_all_without_volumes() {
        let journal = CallJournal::new();
        let provisioner = teardown_fixture(&journal, None);

        assert!(provisioner.destroy_all(false));
        assert_eq!(
            journal.destroyed_kinds(),
            vec![
                ResourceKind::FloatingIpAssignment,
                ResourceKind::Server,
                ResourceKind::Network,
                ResourceKind::SshKey,
                ResourceKind::FloatingIp,
            ]
        );
    }

    #[test]
    fn test_destroy_all_with_volumes() {
        let journal = CallJournal::new();
        let provisioner = teardown_fixture(&journal, None);

        assert!(provisioner.destroy_all(true));
        assert_eq!(
            journal.destroyed_kinds(),
            vec![
                ResourceKind::FloatingIpAssignment,
                ResourceKind::Server,
                ResourceKind::Volume,
                ResourceKind::Network,
                ResourceKind::SshKey,
                ResourceKind::FloatingIp,
            ]
        );
    }

    #[test]
    fn test_destroy_all_stops_at_first_failure() {
        let journal = CallJournal::new();
        let provisioner = teardown_fixture(&journal, Some(ResourceKind::Server));

        let err = provisioner.try_destroy_all(true).unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::DestroyAll {
                kind: ResourceKind::Server
            }
        ));
        assert_eq!(
            journal.destroyed_kinds(),
            vec![ResourceKind::FloatingIpAssignment, ResourceKind::Server]
        );
        assert!(!provisioner.destroy_all(false));
    }

    #[test]
    fn test_default_health_check_policy() {
        let provisioner = Provisioner::new(Arc::new(ProvisionerRegistry::new()));
        assert_eq!(*provisioner.health_check_retry(), RetryPolicy::new(15, Duration::from_secs(5)));
    }
}
