//! # vaultkit
//!
//! HashiCorp Vault support for the provisioner engine.
//!
//! This crate provides:
//! - [`VaultPolicyProvisioner`] and [`VaultMountProvisioner`], adapters that
//!   reconcile ACL policies and secret engine mounts
//! - [`VaultClient`], a blocking client for the Vault HTTP API
//! - [`CertificateManager`], background issuance and rotation of service
//!   certificates from a PKI mount
//! - naming conventions for per-environment mounts and paths
//!
//! ## Example
//!
//! ```
//! use provisioner::{Provisioner, ProvisionerRegistry, ResourceRef};
//! use std::sync::Arc;
//! use vaultkit::backend::{MockVault, VaultApi};
//! use vaultkit::{PolicyRule, VaultMount, VaultPolicy};
//!
//! let vault: Arc<dyn VaultApi> = Arc::new(MockVault::new());
//!
//! let mut registry = ProvisionerRegistry::new();
//! vaultkit::register_provisioners(&mut registry, vault.clone());
//!
//! let kv: ResourceRef = Arc::new(VaultMount::new("acme-dev-kv", "kv"));
//! let reader: ResourceRef = Arc::new(
//!     VaultPolicy::new("reader")
//!         .with_rule(PolicyRule::new("acme-dev-kv/*", ["read"]))
//!         .with_parent(kv.clone()),
//! );
//!
//! let mut provisioner = Provisioner::new(Arc::new(registry));
//! let secrets = provisioner.create_resource_group("secrets", vec![]).unwrap();
//! secrets.add_resource(kv).add_resource(reader);
//!
//! assert!(provisioner.apply());
//! assert!(vault.read_policy("reader").unwrap().is_some());
//! ```

pub mod backend;
pub mod certificate;
pub mod client;
pub mod error;
pub mod mount;
pub mod naming;
pub mod policy;

use provisioner::ProvisionerRegistry;
use std::sync::Arc;

// Re-export main types at crate root
pub use backend::{HealthStatus, MockVault, MountConfig, VaultApi, vault_health_check};
pub use certificate::{
    Certificate, CertificateIssuer, CertificateManager, RotationSettings, VaultCertificateIssuer,
};
pub use client::VaultClient;
pub use error::{Error, ErrorCategory, Result};
pub use mount::{VaultMount, VaultMountProvisioner};
pub use policy::{PolicyRule, VaultPolicy, VaultPolicyProvisioner};

/// Register the policy and mount adapters, all talking to `vault`
pub fn register_provisioners(registry: &mut ProvisionerRegistry, vault: Arc<dyn VaultApi>) {
    registry
        .register_provisioner(VaultMountProvisioner::new(vault.clone()))
        .register_provisioner(VaultPolicyProvisioner::new(vault));
}
