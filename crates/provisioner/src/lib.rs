//! # Provisioner
//!
//! A reconciliation engine for infrastructure described as ordered groups
//! of resources.
//!
//! The engine walks registered resource groups in order, asks a
//! kind-specific adapter for each resource's diff against the remote
//! state, and converges by destroying what must be recreated and applying
//! what changed or is missing. Changes propagate down the parent graph: a
//! resource whose ancestor changed is re-applied even if its own diff is
//! clean.
//!
//! ## Core Concepts
//!
//! - **Resource**: A desired piece of infrastructure, identified by kind and name
//! - **ResourceGroup**: An ordered layer of resources, optionally gated on earlier groups
//! - **InfrastructureProvisioner**: The adapter that diffs and applies one kind
//! - **Outcome**: Success-with-value, success-without-value, or failure with a message
//! - **Provisioner**: The engine that runs apply, plan and teardown
//!
//! ## Example
//!
//! ```
//! use provisioner::mock::{CallJournal, MockProvisioner, MockResource};
//! use provisioner::{Provisioner, ProvisionerRegistry, Resource, ResourceRef};
//! use std::sync::Arc;
//!
//! let journal = CallJournal::new();
//! let mock = MockProvisioner::new(journal.clone());
//!
//! let network: ResourceRef = Arc::new(MockResource::new("network"));
//! let server: ResourceRef = Arc::new(MockResource::new("server").with_parent(network.clone()));
//! mock.diff_is_changed(&network.id());
//!
//! let mut registry = ProvisionerRegistry::new();
//! registry.register_provisioner(mock);
//!
//! let mut provisioner = Provisioner::new(Arc::new(registry));
//! let infra = provisioner.create_resource_group("infra", vec![]).unwrap();
//! infra.add_resource(network.clone()).add_resource(server.clone());
//!
//! assert!(provisioner.apply());
//! // the server is re-applied because its network changed
//! assert_eq!(journal.apply_count(&server.id()), 1);
//! ```

pub mod diff;
pub mod engine;
pub mod error;
pub mod group;
pub mod mock;
pub mod outcome;
pub mod registry;
pub mod resource;
pub mod retry;

// Re-export main types at crate root
pub use diff::{DiffSummary, PARENT_CHANGED, ResourceDiff, ResourceDiffItem, changed_or_missing};
pub use engine::{GroupPlan, Provisioner, teardown_order};
pub use error::{FailureStage, ProvisionError, RegistrationError};
pub use group::ResourceGroup;
pub use outcome::Outcome;
pub use registry::{InfrastructureProvisioner, ProvisionerRegistry, ResourceLookup};
pub use resource::{
    HealthCheck, Resource, ResourceId, ResourceKind, ResourceRef, RuntimeState, all_infra_parents,
    downcast,
};
pub use retry::{RetryPolicy, retry_while_unhealthy};
