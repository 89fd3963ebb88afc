//! Resource groups - named, ordered, append-only sets of resources

use crate::resource::{ResourceId, ResourceRef};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// A named, ordered collection of resources
///
/// Groups are cheap-to-clone handles: the engine and the caller share the
/// same underlying group, so resources added after registration are seen
/// by the next run. Membership only grows; groups go away as a whole when
/// the engine is cleared.
///
/// Two handles are equal when they point at the same group.
#[derive(Clone)]
pub struct ResourceGroup {
    inner: Arc<GroupInner>,
}

struct GroupInner {
    name: String,
    depends_on: Vec<ResourceGroup>,
    resources: RwLock<Vec<ResourceRef>>,
}

impl ResourceGroup {
    /// Create a group that depends on the given groups
    pub fn new(name: impl Into<String>, depends_on: Vec<ResourceGroup>) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                name: name.into(),
                depends_on,
                resources: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Groups whose health checks gate this group
    pub fn depends_on(&self) -> &[ResourceGroup] {
        &self.inner.depends_on
    }

    /// Append a resource to the group
    pub fn add_resource(&self, resource: ResourceRef) -> &Self {
        self.inner
            .resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(resource);
        self
    }

    /// Snapshot of the resources in insertion order
    pub fn resources(&self) -> Vec<ResourceRef> {
        self.inner
            .resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resources in insertion order with repeated identities removed
    pub fn distinct_resources(&self) -> Vec<ResourceRef> {
        let mut seen: HashSet<ResourceId> = HashSet::new();
        self.resources()
            .into_iter()
            .filter(|r| seen.insert(r.id()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether both handles refer to the same group
    pub fn same_group(&self, other: &ResourceGroup) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for ResourceGroup {
    fn eq(&self, other: &Self) -> bool {
        self.same_group(other)
    }
}

impl Eq for ResourceGroup {}

impl fmt::Debug for ResourceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceGroup")
            .field("name", &self.name())
            .field(
                "depends_on",
                &self.depends_on().iter().map(ResourceGroup::name).collect::<Vec<_>>(),
            )
            .field("resources", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockResource;

    #[test]
    fn test_add_resource_keeps_insertion_order() {
        let group = ResourceGroup::new("layer1", Vec::new());
        group
            .add_resource(Arc::new(MockResource::new("b")))
            .add_resource(Arc::new(MockResource::new("a")));

        let names: Vec<String> = group
            .resources()
            .iter()
            .map(|r| r.id().name().to_string())
            .collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(group.len(), 2);
    }

    #[test]
    fn test_distinct_resources_drops_duplicates() {
        let group = ResourceGroup::new("layer1", Vec::new());
        let resource: ResourceRef = Arc::new(MockResource::new("a"));
        group.add_resource(resource.clone());
        group.add_resource(Arc::new(MockResource::new("b")));
        group.add_resource(resource);

        assert_eq!(group.len(), 3);
        assert_eq!(group.distinct_resources().len(), 2);
    }

    #[test]
    fn test_clones_share_membership() {
        let group = ResourceGroup::new("layer1", Vec::new());
        let handle = group.clone();
        handle.add_resource(Arc::new(MockResource::new("a")));

        assert_eq!(group.len(), 1);
        assert_eq!(group, handle);
    }

    #[test]
    fn test_equality_is_identity() {
        let a = ResourceGroup::new("layer1", Vec::new());
        let b = ResourceGroup::new("layer1", Vec::new());
        assert_ne!(a, b);
    }

    #[test]
    fn test_depends_on() {
        let base = ResourceGroup::new("base", Vec::new());
        let app = ResourceGroup::new("app", vec![base.clone()]);
        assert!(app.depends_on()[0].same_group(&base));
        assert!(base.is_empty());
    }
}
