//! Role graph with inheritance, backed by a write-through memoized cache
//! of each role's transitive permission set.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

/// A single role: its own permissions plus the names of roles it inherits
/// from. Permission strings use the `action:resource` grammar understood
/// by [`crate::context::permission_matches`].
#[derive(Debug, Clone, Default)]
pub struct Role {
    pub name: String,
    pub permissions: Vec<String>,
    pub parents: Vec<String>,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), permissions: Vec::new(), parents: Vec::new() }
    }

    pub fn with_permissions(mut self, permissions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_parents(mut self, parents: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.parents = parents.into_iter().map(Into::into).collect();
        self
    }
}

/// A mutable registry of roles with a write-through cache of transitive
/// permission sets. Any mutation (`add_role`, `remove_role`) invalidates
/// the whole cache; lookups repopulate it lazily.
#[derive(Default)]
pub struct RoleGraph {
    roles: DashMap<String, Role>,
    cache: DashMap<String, Arc<Vec<String>>>,
}

impl RoleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_role(&self, role: Role) {
        self.roles.insert(role.name.clone(), role);
        self.cache.clear();
    }

    pub fn remove_role(&self, name: &str) {
        self.roles.remove(name);
        self.cache.clear();
    }

    /// The full set of permissions reachable from `role_name` through
    /// inheritance, memoized. Cycles terminate traversal via a visited-set:
    /// a role that transitively references itself contributes its own
    /// permissions plus those of any acyclic ancestors already reached.
    pub fn transitive_permissions(&self, role_name: &str) -> Arc<Vec<String>> {
        if let Some(cached) = self.cache.get(role_name) {
            return cached.clone();
        }

        let mut visited = HashSet::new();
        let mut permissions = Vec::new();
        self.collect(role_name, &mut visited, &mut permissions);

        let result = Arc::new(permissions);
        self.cache.insert(role_name.to_string(), result.clone());
        result
    }

    fn collect(&self, role_name: &str, visited: &mut HashSet<String>, out: &mut Vec<String>) {
        if !visited.insert(role_name.to_string()) {
            return;
        }
        let Some(role) = self.roles.get(role_name) else { return };
        out.extend(role.permissions.iter().cloned());
        let parents = role.parents.clone();
        drop(role);
        for parent in parents {
            self.collect(&parent, visited, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitive_permissions_include_ancestors() {
        let graph = RoleGraph::new();
        graph.add_role(Role::new("user").with_permissions(["read:orders"]));
        graph.add_role(Role::new("manager").with_parents(["user"]).with_permissions(["update:orders"]));

        let perms = graph.transitive_permissions("manager");
        assert!(perms.contains(&"read:orders".to_string()));
        assert!(perms.contains(&"update:orders".to_string()));
    }

    #[test]
    fn cyclic_roles_terminate_and_union_permissions() {
        let graph = RoleGraph::new();
        graph.add_role(Role::new("a").with_parents(["b"]).with_permissions(["perm:a"]));
        graph.add_role(Role::new("b").with_parents(["a"]).with_permissions(["perm:b"]));

        let perms = graph.transitive_permissions("a");
        assert!(perms.contains(&"perm:a".to_string()));
        assert!(perms.contains(&"perm:b".to_string()));
    }

    #[test]
    fn mutation_invalidates_cache() {
        let graph = RoleGraph::new();
        graph.add_role(Role::new("user").with_permissions(["read:orders"]));
        let first = graph.transitive_permissions("user");
        assert_eq!(first.len(), 1);

        graph.add_role(Role::new("user").with_permissions(["read:orders", "write:orders"]));
        let second = graph.transitive_permissions("user");
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn unknown_role_has_no_permissions() {
        let graph = RoleGraph::new();
        assert!(graph.transitive_permissions("ghost").is_empty());
    }
}
