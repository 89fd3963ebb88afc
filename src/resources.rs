//! Turn manifest groups into engine resource groups

use crate::config::{Manifest, MountSpec, PolicySpec};
use anyhow::{Context, Result, bail};
use provisioner::{Provisioner, ProvisionerRegistry, ResourceGroup, ResourceRef};
use std::collections::HashMap;
use std::sync::Arc;
use vaultkit::{PolicyRule, VaultApi, VaultMount, VaultPolicy, vault_health_check};

/// Resources declared so far, by `kind:name` reference
#[derive(Default)]
struct Declared {
    resources: HashMap<String, ResourceRef>,
    groups: HashMap<String, ResourceGroup>,
}

impl Declared {
    fn parents(&self, owner: &str, references: &[String]) -> Result<Vec<ResourceRef>> {
        references
            .iter()
            .map(|reference| {
                self.resources.get(reference).cloned().with_context(|| {
                    format!(
                        "{owner}: unknown parent '{reference}' (use 'mount:<path>' or 'policy:<name>' \
                         declared earlier in the manifest)"
                    )
                })
            })
            .collect()
    }

    fn insert(&mut self, reference: String, resource: ResourceRef) -> Result<()> {
        if self.resources.insert(reference.clone(), resource).is_some() {
            bail!("'{reference}' is declared more than once");
        }
        Ok(())
    }
}

/// Engine with the Vault adapters registered and every manifest group added
pub fn build_provisioner(manifest: &Manifest, vault: Arc<dyn VaultApi>) -> Result<Provisioner> {
    let mut registry = ProvisionerRegistry::new();
    vaultkit::register_provisioners(&mut registry, vault.clone());

    let mut provisioner =
        Provisioner::new(Arc::new(registry)).with_health_check_retry(manifest.health_check_retry());
    register_groups(manifest, &mut provisioner, &vault)?;
    Ok(provisioner)
}

fn register_groups(
    manifest: &Manifest,
    provisioner: &mut Provisioner,
    vault: &Arc<dyn VaultApi>,
) -> Result<()> {
    let mut declared = Declared::default();

    for spec in &manifest.groups {
        let depends_on = spec
            .depends_on
            .iter()
            .map(|name| {
                declared.groups.get(name).cloned().with_context(|| {
                    format!("group '{}' depends on unknown group '{name}'", spec.name)
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let group = provisioner.create_resource_group(&spec.name, depends_on)?;

        for mount in &spec.mounts {
            let resource: ResourceRef = Arc::new(mount_resource(mount, &declared, vault)?);
            declared.insert(format!("mount:{}", mount.path.trim_matches('/')), resource.clone())?;
            group.add_resource(resource);
        }

        for policy in &spec.policies {
            let resource: ResourceRef = Arc::new(policy_resource(policy, &declared, vault)?);
            declared.insert(format!("policy:{}", policy.name), resource.clone())?;
            group.add_resource(resource);
        }

        log::debug!("registered resource group '{}' with {} resources", spec.name, group.len());
        declared.groups.insert(spec.name.clone(), group);
    }

    Ok(())
}

fn mount_resource(spec: &MountSpec, declared: &Declared, vault: &Arc<dyn VaultApi>) -> Result<VaultMount> {
    let mut mount = VaultMount::new(&spec.path, &spec.engine_type).with_description(&spec.description);
    for (key, value) in &spec.options {
        mount = mount.with_option(key, value);
    }
    for parent in declared.parents(&format!("mount '{}'", spec.path), &spec.parents)? {
        mount = mount.with_parent(parent);
    }
    if spec.health_check {
        mount = mount.with_health_check(vault_health_check(vault.clone()));
    }
    Ok(mount)
}

fn policy_resource(spec: &PolicySpec, declared: &Declared, vault: &Arc<dyn VaultApi>) -> Result<VaultPolicy> {
    let mut policy = VaultPolicy::new(&spec.name);
    for rule in &spec.rules {
        policy = policy.with_rule(PolicyRule::new(&rule.path, rule.capabilities.iter().cloned()));
    }
    for parent in declared.parents(&format!("policy '{}'", spec.name), &spec.parents)? {
        policy = policy.with_parent(parent);
    }
    if spec.health_check {
        policy = policy.with_health_check(vault_health_check(vault.clone()));
    }
    Ok(policy)
}
