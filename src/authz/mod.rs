//! Authorizers: `Authorize(ctx, Principal, action, resource) -> Result<()>`.
//!
//! [`RbacAuthorizer`] is the primary variant: a role graph with inheritance,
//! resolved through a write-through memoized permission cache. The simpler
//! variants in [`simple`] compose without the graph.

pub mod role;
pub mod simple;

use async_trait::async_trait;

use crate::context::{permission_matches, Principal, RequestContext};
use crate::error::{Error, Result};

pub use role::{Role, RoleGraph};
pub use simple::{AllowAll, CompositeAll, DenyAll, PermissionAll, PermissionAny, RoleAll, RoleAny};

#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(
        &self,
        ctx: &RequestContext,
        principal: Option<&Principal>,
        action: &str,
        resource: &str,
    ) -> Result<()>;
}

/// RBAC authorizer: direct principal permissions, then each attached
/// role's transitive permission set, memoized per role name.
pub struct RbacAuthorizer {
    roles: RoleGraph,
}

impl RbacAuthorizer {
    pub fn new(roles: RoleGraph) -> Self {
        Self { roles }
    }

    fn query(action: &str, resource: &str) -> String {
        format!("{action}:{resource}")
    }
}

#[async_trait]
impl Authorizer for RbacAuthorizer {
    async fn authorize(
        &self,
        _ctx: &RequestContext,
        principal: Option<&Principal>,
        action: &str,
        resource: &str,
    ) -> Result<()> {
        let principal = principal.ok_or_else(|| Error::Unauthenticated("no principal on request".into()))?;
        if principal.is_expired() {
            return Err(Error::Forbidden("principal has expired".into()));
        }
        let query = Self::query(action, resource);

        if principal.permissions.iter().any(|p| permission_matches(p, &query)) {
            return Ok(());
        }

        for role_name in &principal.roles {
            let permissions = self.roles.transitive_permissions(role_name);
            if permissions.iter().any(|p| permission_matches(p, &query)) {
                return Ok(());
            }
        }

        Err(Error::Forbidden(format!("missing permission for {query}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s2_role_graph() -> RoleGraph {
        let graph = RoleGraph::new();
        graph.add_role(Role::new("user").with_permissions(["read:orders"]));
        graph.add_role(Role::new("manager").with_parents(["user"]).with_permissions(["update:orders"]));
        graph.add_role(Role::new("admin").with_parents(["manager"]).with_permissions(["delete:orders"]));
        graph
    }

    #[tokio::test]
    async fn rbac_inheritance_scenario() {
        let authorizer = RbacAuthorizer::new(s2_role_graph());
        let ctx = RequestContext::new("req-1");

        let admin = Principal::new("user:1").with_roles(["admin"]);
        authorizer.authorize(&ctx, Some(&admin), "delete", "orders").await.unwrap();
        authorizer.authorize(&ctx, Some(&admin), "read", "orders").await.unwrap();

        let manager = Principal::new("user:2").with_roles(["manager"]);
        let err = authorizer.authorize(&ctx, Some(&manager), "delete", "orders").await.unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test]
    async fn direct_permission_bypasses_role_lookup() {
        let authorizer = RbacAuthorizer::new(RoleGraph::new());
        let ctx = RequestContext::new("req-1");
        let principal = Principal::new("client:svc").with_permissions(["orders:*"]);
        authorizer.authorize(&ctx, Some(&principal), "read", "orders:123").await.unwrap();
    }

    #[tokio::test]
    async fn expired_principal_is_forbidden_even_with_matching_permission() {
        let authorizer = RbacAuthorizer::new(RoleGraph::new());
        let ctx = RequestContext::new("req-1");
        let principal = Principal::new("client:svc")
            .with_permissions(["orders:*"])
            .with_expires_at(chrono::Utc::now() - chrono::Duration::seconds(1));
        let err = authorizer.authorize(&ctx, Some(&principal), "read", "orders:123").await.unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test]
    async fn no_principal_is_unauthenticated_not_forbidden() {
        let authorizer = RbacAuthorizer::new(RoleGraph::new());
        let ctx = RequestContext::new("req-1");
        let err = authorizer.authorize(&ctx, None, "read", "orders").await.unwrap_err();
        assert!(matches!(err, Error::Unauthenticated(_)));
    }
}
