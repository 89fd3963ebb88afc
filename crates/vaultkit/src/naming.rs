//! Naming conventions for per-environment Vault objects.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const UNSEAL_KEY_PREFIX: &str = "vault-unseal-key";
pub const ROOT_TOKEN_KEY: &str = "vault-root-token";
pub const CONTROLLER_POLICY_NAME: &str = "controller";
pub const BACKUP_POLICY_NAME: &str = "backup";

/// A cloud environment, e.g. `acme` / `dev`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvironmentReference {
    pub cloud: String,
    pub environment: String,
}

impl EnvironmentReference {
    pub fn new(cloud: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            cloud: cloud.into(),
            environment: environment.into(),
        }
    }

    pub fn cloud_id(&self) -> String {
        cloud_id(&self.cloud, &self.environment)
    }

    pub fn service(&self, service: impl Into<String>) -> ServiceReference {
        ServiceReference {
            cloud: self.cloud.clone(),
            environment: self.environment.clone(),
            service: service.into(),
        }
    }
}

impl fmt::Display for EnvironmentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cloud, self.environment)
    }
}

/// A service inside a cloud environment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceReference {
    pub cloud: String,
    pub environment: String,
    pub service: String,
}

impl ServiceReference {
    pub fn environment_reference(&self) -> EnvironmentReference {
        EnvironmentReference::new(&self.cloud, &self.environment)
    }
}

impl fmt::Display for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.cloud, self.environment, self.service)
    }
}

pub fn cloud_id(cloud: &str, environment: &str) -> String {
    format!("{cloud}-{environment}")
}

pub fn pki_mount_name(reference: &EnvironmentReference) -> String {
    format!("{}-pki", reference.cloud_id())
}

pub fn kv_mount_name(reference: &EnvironmentReference) -> String {
    format!("{}-kv", reference.cloud_id())
}

pub fn host_ssh_mount_name(reference: &EnvironmentReference) -> String {
    format!("{}-host-ssh", reference.cloud_id())
}

pub fn user_ssh_mount_name(reference: &EnvironmentReference) -> String {
    format!("{}-user-ssh", reference.cloud_id())
}

/// Secret path of a service inside the kv mount
pub fn service_path(service: &str) -> String {
    format!("solidblocks/services/{service}")
}

pub fn vault_address(environment: &str, root_domain: &str) -> String {
    format!("https://vault.{environment}.{root_domain}:8200")
}
