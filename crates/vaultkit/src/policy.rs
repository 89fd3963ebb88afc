//! ACL policies as reconcilable resources.
//!
//! Policies are written to Vault as JSON documents of the form
//! `{"path": {"kv/*": {"capabilities": ["read"]}}}`. A stored policy that
//! does not parse as such (e.g. hand-written HCL) is treated as having no
//! rules, so the next run rewrites it.

use crate::backend::{BUILTIN_POLICIES, VaultApi};
use crate::error::{Error, Result};
use log::{error, info};
use provisioner::{
    HealthCheck, InfrastructureProvisioner, Outcome, Resource, ResourceDiff, ResourceDiffItem,
    ResourceId, ResourceKind, ResourceLookup, ResourceRef, RuntimeState, downcast,
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// One path rule of a policy
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyRule {
    pub path: String,
    pub capabilities: BTreeSet<String>,
}

impl PolicyRule {
    pub fn new<I, S>(path: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PolicyDocument {
    #[serde(default)]
    path: BTreeMap<String, PathCapabilities>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PathCapabilities {
    #[serde(default)]
    capabilities: BTreeSet<String>,
}

/// Render rules as a Vault policy document
pub fn render_policy(rules: &[PolicyRule]) -> Result<String> {
    let document = PolicyDocument {
        path: rules
            .iter()
            .map(|r| {
                let caps = PathCapabilities {
                    capabilities: r.capabilities.clone(),
                };
                (r.path.clone(), caps)
            })
            .collect(),
    };
    Ok(serde_json::to_string(&document)?)
}

/// Rules of a stored policy document
pub fn parse_policy(document: &str) -> Result<BTreeSet<PolicyRule>> {
    let document: PolicyDocument = serde_json::from_str(document)?;
    Ok(document
        .path
        .into_iter()
        .map(|(path, caps)| PolicyRule {
            path,
            capabilities: caps.capabilities,
        })
        .collect())
}

/// Desired ACL policy
#[derive(Debug, Clone)]
pub struct VaultPolicy {
    pub name: String,
    pub rules: Vec<PolicyRule>,
    parents: Vec<ResourceRef>,
    health_check: Option<HealthCheck>,
}

impl VaultPolicy {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
            parents: Vec::new(),
            health_check: None,
        }
    }

    pub fn with_rule(mut self, rule: PolicyRule) -> Self {
        self.rules.push(rule);
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

impl Resource for VaultPolicy {
    fn id(&self) -> ResourceId {
        ResourceId::new(ResourceKind::VaultPolicy, &self.name)
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

/// Observed state of a policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultPolicyRuntime {
    pub rules: BTreeSet<PolicyRule>,
}

/// Adapter for [`VaultPolicy`] resources
pub struct VaultPolicyProvisioner {
    vault: Arc<dyn VaultApi>,
}

impl VaultPolicyProvisioner {
    pub fn new(vault: Arc<dyn VaultApi>) -> Self {
        Self { vault }
    }

    fn runtime(&self, policy: &VaultPolicy) -> Result<Option<VaultPolicyRuntime>> {
        let Some(document) = self.vault.read_policy(&policy.name)? else {
            return Ok(None);
        };

        let rules = match parse_policy(&document) {
            Ok(rules) => rules,
            Err(e) => {
                info!("policy '{}' is not a JSON document ({e}), treating it as empty", policy.name);
                BTreeSet::new()
            }
        };
        Ok(Some(VaultPolicyRuntime { rules }))
    }
}

fn as_policy(resource: &ResourceRef) -> Result<&VaultPolicy> {
    downcast::<VaultPolicy>(resource.as_ref())
        .ok_or_else(|| Error::Other(format!("{} is not a vault policy", resource.id())))
}

impl ResourceLookup for VaultPolicyProvisioner {
    fn kind(&self) -> ResourceKind {
        ResourceKind::VaultPolicy
    }

    fn lookup(&self, resource: &ResourceRef) -> Outcome<RuntimeState> {
        let state = as_policy(resource)
            .and_then(|policy| self.runtime(policy))
            .and_then(|runtime| runtime.map(serde_json::to_value).transpose().map_err(Error::from));
        Outcome::from_result(state)
    }
}

impl InfrastructureProvisioner for VaultPolicyProvisioner {
    fn diff(&self, resource: &ResourceRef) -> Outcome<ResourceDiff> {
        let policy = match as_policy(resource) {
            Ok(policy) => policy,
            Err(e) => return Outcome::failure(e.to_string()),
        };

        Outcome::from_result(self.runtime(policy)).map_or_else_missing(
            |runtime| {
                let mut changes = Vec::new();
                // extra remote rules are tolerated
                if !policy.rules.iter().all(|r| runtime.rules.contains(r)) {
                    changes.push(ResourceDiffItem::changed("rules"));
                }
                ResourceDiff::with_changes(resource.clone(), changes)
            },
            || ResourceDiff::missing(resource.clone()),
        )
    }

    fn apply(&self, resource: &ResourceRef) -> Outcome<()> {
        let result = as_policy(resource).and_then(|policy| {
            let document = render_policy(&policy.rules)?;
            self.vault.write_policy(&policy.name, &document)
        });
        Outcome::from_result(result.map(Some))
    }

    fn destroy(&self, resource: &ResourceRef) -> bool {
        let result = as_policy(resource).and_then(|policy| match self.vault.delete_policy(&policy.name) {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        });

        match result {
            Ok(()) => true,
            Err(e) => {
                error!("failed to delete {}: {e}", resource.log_name());
                false
            }
        }
    }

    fn destroy_all(&self) -> bool {
        let policies = match self.vault.list_policies() {
            Ok(policies) => policies,
            Err(e) => {
                error!("failed to list vault policies: {e}");
                return false;
            }
        };

        let mut ok = true;
        for name in policies
            .iter()
            .filter(|name| !BUILTIN_POLICIES.contains(&name.as_str()))
        {
            info!("deleting vault policy '{name}'");
            if let Err(e) = self.vault.delete_policy(name) {
                error!("failed to delete vault policy '{name}': {e}");
                ok = false;
            }
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockVault;

    fn reader() -> VaultPolicy {
        VaultPolicy::new("reader").with_rule(PolicyRule::new("kv/data/*", ["read", "list"]))
    }

    fn adapter() -> (VaultPolicyProvisioner, MockVault) {
        let vault = MockVault::new();
        (VaultPolicyProvisioner::new(Arc::new(vault.clone())), vault)
    }

    #[test]
    fn test_render_and_parse() {
        let rules = vec![
            PolicyRule::new("kv/data/*", ["read"]),
            PolicyRule::new("pki/issue/*", ["create", "update"]),
        ];
        let parsed = parse_policy(&render_policy(&rules).unwrap()).unwrap();
        assert_eq!(parsed, rules.into_iter().collect::<BTreeSet<_>>());
    }

    #[test]
    fn test_missing_policy() {
        let (adapter, _) = adapter();
        let resource: ResourceRef = Arc::new(reader());

        assert!(adapter.lookup(&resource).is_empty());
        assert!(adapter.diff(&resource).into_result().unwrap().is_missing());
    }

    #[test]
    fn test_apply_then_diff_is_clean() {
        let (adapter, vault) = adapter();
        let resource: ResourceRef = Arc::new(reader());

        assert!(!adapter.apply(&resource).is_failed());
        assert!(vault.policy_names().contains(&"reader".to_string()));

        let diff = adapter.diff(&resource).into_result().unwrap();
        assert!(!diff.has_changes_or_missing());
    }

    #[test]
    fn test_missing_rule_is_a_change() {
        let (adapter, vault) = adapter();
        vault
            .write_policy("reader", &render_policy(&[PolicyRule::new("kv/data/*", ["read"])]).unwrap())
            .unwrap();
        let resource: ResourceRef = Arc::new(reader());

        let diff = adapter.diff(&resource).into_result().unwrap();
        assert_eq!(diff.changed_attributes(), vec!["rules"]);
        assert!(!diff.needs_recreate());
    }

    #[test]
    fn test_extra_remote_rules_are_tolerated() {
        let (adapter, vault) = adapter();
        let rules = [
            PolicyRule::new("kv/data/*", ["read", "list"]),
            PolicyRule::new("sys/health", ["read"]),
        ];
        vault.write_policy("reader", &render_policy(&rules).unwrap()).unwrap();
        let resource: ResourceRef = Arc::new(reader());

        assert!(!adapter.diff(&resource).into_result().unwrap().has_changes());
    }

    #[test]
    fn test_hcl_policy_is_rewritten() {
        let (adapter, vault) = adapter();
        vault
            .write_policy("reader", "path \"kv/data/*\" { capabilities = [\"read\"] }")
            .unwrap();
        let resource: ResourceRef = Arc::new(reader());

        assert!(adapter.diff(&resource).into_result().unwrap().has_changes());
    }

    #[test]
    fn test_unreachable_vault_fails_lookup() {
        let (adapter, vault) = adapter();
        vault.set_healthy(false);
        let resource: ResourceRef = Arc::new(reader());

        assert!(adapter.lookup(&resource).is_failed());
        assert!(adapter.diff(&resource).is_failed());
        assert!(adapter.apply(&resource).is_failed());
        assert!(!adapter.destroy(&resource));
    }

    #[test]
    fn test_destroy_all_keeps_builtin_policies() {
        let (adapter, vault) = adapter();
        assert!(!adapter.apply(&(Arc::new(reader()) as ResourceRef)).is_failed());

        assert!(adapter.destroy_all());
        assert_eq!(vault.policy_names(), vec!["default", "root"]);
    }

    #[test]
    fn test_destroy_missing_policy_succeeds() {
        let (adapter, _) = adapter();
        assert!(adapter.destroy(&(Arc::new(reader()) as ResourceRef)));
    }
}
