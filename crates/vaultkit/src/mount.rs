//! Secret engine mounts as reconcilable resources.

use crate::backend::{MountConfig, SYSTEM_MOUNTS, VaultApi};
use crate::error::{Error, Result};
use log::{error, info};
use provisioner::{
    HealthCheck, InfrastructureProvisioner, Outcome, Resource, ResourceDiff, ResourceDiffItem,
    ResourceId, ResourceKind, ResourceLookup, ResourceRef, RuntimeState, downcast,
};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Desired secret engine mount (`kv`, `pki`, `ssh`, ...)
#[derive(Debug, Clone)]
pub struct VaultMount {
    /// Mount path without trailing slash
    pub path: String,
    pub engine_type: String,
    pub description: String,
    pub options: BTreeMap<String, String>,
    parents: Vec<ResourceRef>,
    health_check: Option<HealthCheck>,
}

impl VaultMount {
    pub fn new(path: impl Into<String>, engine_type: impl Into<String>) -> Self {
        Self {
            path: path.into().trim_matches('/').to_string(),
            engine_type: engine_type.into(),
            description: String::new(),
            options: BTreeMap::new(),
            parents: Vec::new(),
            health_check: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
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

    fn config(&self) -> MountConfig {
        MountConfig {
            engine_type: self.engine_type.clone(),
            description: self.description.clone(),
            options: self.options.clone(),
        }
    }
}

impl Resource for VaultMount {
    fn id(&self) -> ResourceId {
        ResourceId::new(ResourceKind::VaultMount, &self.path)
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

/// Compare a desired mount with the enabled one
///
/// The engine type cannot change in place. Description and options are
/// tuned; remote options not named by the desired mount are ignored.
pub fn mount_changes(desired: &VaultMount, remote: &MountConfig) -> Vec<ResourceDiffItem> {
    let mut changes = Vec::new();

    if desired.engine_type != remote.engine_type {
        changes.push(ResourceDiffItem::recreate("type"));
    }
    if desired.description != remote.description {
        changes.push(ResourceDiffItem::changed("description"));
    }
    if desired
        .options
        .iter()
        .any(|(key, value)| remote.options.get(key) != Some(value))
    {
        changes.push(ResourceDiffItem::changed("options"));
    }

    changes
}

/// Adapter for [`VaultMount`] resources
pub struct VaultMountProvisioner {
    vault: Arc<dyn VaultApi>,
}

impl VaultMountProvisioner {
    pub fn new(vault: Arc<dyn VaultApi>) -> Self {
        Self { vault }
    }

    fn converge(&self, mount: &VaultMount) -> Result<()> {
        let desired = mount.config();
        match self.vault.read_mount(&mount.path)? {
            None => {
                info!("enabling {} secret engine at '{}/'", mount.engine_type, mount.path);
                self.vault.enable_mount(&mount.path, &desired)
            }
            Some(remote) if remote.engine_type != desired.engine_type => Err(Error::Other(format!(
                "mount '{}' has type '{}', expected '{}'",
                mount.path, remote.engine_type, desired.engine_type
            ))),
            Some(_) => {
                info!("tuning secret engine at '{}/'", mount.path);
                self.vault.tune_mount(&mount.path, &desired)
            }
        }
    }
}

fn as_mount(resource: &ResourceRef) -> Result<&VaultMount> {
    downcast::<VaultMount>(resource.as_ref())
        .ok_or_else(|| Error::Other(format!("{} is not a vault mount", resource.id())))
}

impl ResourceLookup for VaultMountProvisioner {
    fn kind(&self) -> ResourceKind {
        ResourceKind::VaultMount
    }

    fn lookup(&self, resource: &ResourceRef) -> Outcome<RuntimeState> {
        let state = as_mount(resource)
            .and_then(|mount| self.vault.read_mount(&mount.path))
            .and_then(|config| config.map(serde_json::to_value).transpose().map_err(Error::from));
        Outcome::from_result(state)
    }
}

impl InfrastructureProvisioner for VaultMountProvisioner {
    fn diff(&self, resource: &ResourceRef) -> Outcome<ResourceDiff> {
        let mount = match as_mount(resource) {
            Ok(mount) => mount,
            Err(e) => return Outcome::failure(e.to_string()),
        };

        Outcome::from_result(self.vault.read_mount(&mount.path)).map_or_else_missing(
            |remote| ResourceDiff::with_changes(resource.clone(), mount_changes(mount, &remote)),
            || ResourceDiff::missing(resource.clone()),
        )
    }

    fn apply(&self, resource: &ResourceRef) -> Outcome<()> {
        let result = as_mount(resource).and_then(|mount| self.converge(mount));
        Outcome::from_result(result.map(Some))
    }

    fn destroy(&self, resource: &ResourceRef) -> bool {
        let result = as_mount(resource).and_then(|mount| {
            info!("disabling secret engine at '{}/'", mount.path);
            self.vault.disable_mount(&mount.path)
        });

        match result {
            Ok(()) => true,
            Err(e) => {
                error!("failed to disable {}: {e}", resource.log_name());
                false
            }
        }
    }

    fn destroy_all(&self) -> bool {
        let mounts = match self.vault.list_mounts() {
            Ok(mounts) => mounts,
            Err(e) => {
                error!("failed to list vault mounts: {e}");
                return false;
            }
        };

        let mut ok = true;
        for path in mounts
            .iter()
            .filter(|path| !SYSTEM_MOUNTS.contains(&path.as_str()))
        {
            info!("disabling secret engine at '{path}/'");
            if let Err(e) = self.vault.disable_mount(path) {
                error!("failed to disable secret engine at '{path}/': {e}");
                ok = false;
            }
        }
        ok
    }
}
