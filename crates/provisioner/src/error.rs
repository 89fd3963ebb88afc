//! Error types for reconciliation runs.
//!
//! The engine reports overall success as a boolean, but every abort is
//! first captured as a [`ProvisionError`] so it can be logged with the
//! resource or group it happened on.

use crate::resource::{ResourceId, ResourceKind};
use thiserror::Error;

/// Stage of a run in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Lookup,
    Diff,
    HealthCheck,
    Destroy,
    Apply,
}

impl FailureStage {
    pub fn description(&self) -> &'static str {
        match self {
            Self::Lookup => "looking up remote state",
            Self::Diff => "computing diffs",
            Self::HealthCheck => "waiting for health checks",
            Self::Destroy => "destroying resources",
            Self::Apply => "applying resources",
        }
    }
}

/// Reasons a reconciliation run aborts.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Remote state lookup reported a failure
    #[error("lookup for {resource} failed: {message}")]
    Lookup { resource: ResourceId, message: String },

    /// An adapter could not compute a diff
    #[error("diff failed for {resource} in resource group '{group}': {message}")]
    Diff {
        group: String,
        resource: ResourceId,
        message: String,
    },

    /// A gating health check never reported healthy
    #[error("healthcheck for {resource} failed after {attempts} attempts (gating resource group '{group}')")]
    HealthCheckExhausted {
        group: String,
        resource: ResourceId,
        attempts: u32,
    },

    /// Destroying a resource that needs recreation failed
    #[error("destroying {resource} failed")]
    Destroy { resource: ResourceId },

    /// Tearing down every resource of a kind failed
    #[error("destroying all resources of kind '{kind}' failed")]
    DestroyAll { kind: ResourceKind },

    /// Applying a resource failed
    #[error("applying {resource} failed: {message}")]
    Apply { resource: ResourceId, message: String },
}

impl ProvisionError {
    /// Get the stage the run was in when it aborted.
    pub fn stage(&self) -> FailureStage {
        match self {
            Self::Lookup { .. } => FailureStage::Lookup,
            Self::Diff { .. } => FailureStage::Diff,
            Self::HealthCheckExhausted { .. } => FailureStage::HealthCheck,
            Self::Destroy { .. } | Self::DestroyAll { .. } => FailureStage::Destroy,
            Self::Apply { .. } => FailureStage::Apply,
        }
    }
}

/// Errors when registering resource groups with the engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    /// The group depends on a group that has not been registered yet
    #[error("resource group '{group}' depends on '{dependency}', which is not registered (register groups in dependency order)")]
    UnknownDependency { group: String, dependency: String },

    /// A group with this name is already registered
    #[error("resource group '{0}' is already registered")]
    DuplicateGroup(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage() {
        let err = ProvisionError::HealthCheckExhausted {
            group: "services".to_string(),
            resource: ResourceId::new(ResourceKind::Server, "vault-1"),
            attempts: 15,
        };
        assert_eq!(err.stage(), FailureStage::HealthCheck);
        assert!(!err.stage().description().is_empty());

        let err = ProvisionError::DestroyAll {
            kind: ResourceKind::Network,
        };
        assert_eq!(err.stage(), FailureStage::Destroy);
    }

    #[test]
    fn test_display_names_resource() {
        let err = ProvisionError::Apply {
            resource: ResourceId::new(ResourceKind::VaultPolicy, "controller"),
            message: "permission denied".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("vault_policy/controller"));
        assert!(display.contains("permission denied"));
    }

    #[test]
    fn test_registration_error_display() {
        let err = RegistrationError::UnknownDependency {
            group: "services".to_string(),
            dependency: "infra".to_string(),
        };
        assert!(err.to_string().contains("'infra'"));
    }
}
