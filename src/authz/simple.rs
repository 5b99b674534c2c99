//! Authorizer variants that compose without the RBAC role graph.

use async_trait::async_trait;

use crate::context::{permission_matches, Principal, RequestContext};
use crate::error::{Error, Result};

use super::Authorizer;

fn require_principal<'a>(principal: Option<&'a Principal>) -> Result<&'a Principal> {
    principal.ok_or_else(|| Error::Unauthenticated("no principal on request".into()))
}

/// Permits iff the principal holds at least one of the named roles.
pub struct RoleAny {
    roles: Vec<String>,
}

impl RoleAny {
    pub fn new(roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { roles: roles.into_iter().map(Into::into).collect() }
    }
}

#[async_trait]
impl Authorizer for RoleAny {
    async fn authorize(&self, _ctx: &RequestContext, principal: Option<&Principal>, _action: &str, _resource: &str) -> Result<()> {
        let principal = require_principal(principal)?;
        if self.roles.iter().any(|r| principal.roles.contains(r)) {
            Ok(())
        } else {
            Err(Error::Forbidden(format!("requires one of roles {:?}", self.roles)))
        }
    }
}

/// Permits iff the principal holds every named role.
pub struct RoleAll {
    roles: Vec<String>,
}

impl RoleAll {
    pub fn new(roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { roles: roles.into_iter().map(Into::into).collect() }
    }
}

#[async_trait]
impl Authorizer for RoleAll {
    async fn authorize(&self, _ctx: &RequestContext, principal: Option<&Principal>, _action: &str, _resource: &str) -> Result<()> {
        let principal = require_principal(principal)?;
        if self.roles.iter().all(|r| principal.roles.contains(r)) {
            Ok(())
        } else {
            Err(Error::Forbidden(format!("requires all of roles {:?}", self.roles)))
        }
    }
}

/// Permits iff the principal's direct permissions satisfy at least one
/// of the named `action:resource` queries.
pub struct PermissionAny {
    queries: Vec<String>,
}

impl PermissionAny {
    pub fn new(queries: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { queries: queries.into_iter().map(Into::into).collect() }
    }
}

#[async_trait]
impl Authorizer for PermissionAny {
    async fn authorize(&self, _ctx: &RequestContext, principal: Option<&Principal>, _action: &str, _resource: &str) -> Result<()> {
        let principal = require_principal(principal)?;
        let satisfied = self
            .queries
            .iter()
            .any(|q| principal.permissions.iter().any(|p| permission_matches(p, q)));
        if satisfied {
            Ok(())
        } else {
            Err(Error::Forbidden(format!("requires one of permissions {:?}", self.queries)))
        }
    }
}

/// Permits iff the principal's direct permissions satisfy every named
/// `action:resource` query.
pub struct PermissionAll {
    queries: Vec<String>,
}

impl PermissionAll {
    pub fn new(queries: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { queries: queries.into_iter().map(Into::into).collect() }
    }
}

#[async_trait]
impl Authorizer for PermissionAll {
    async fn authorize(&self, _ctx: &RequestContext, principal: Option<&Principal>, _action: &str, _resource: &str) -> Result<()> {
        let principal = require_principal(principal)?;
        let satisfied = self
            .queries
            .iter()
            .all(|q| principal.permissions.iter().any(|p| permission_matches(p, q)));
        if satisfied {
            Ok(())
        } else {
            Err(Error::Forbidden(format!("requires all of permissions {:?}", self.queries)))
        }
    }
}

/// Always permits (still requires a principal, to preserve the
/// `unauthenticated` vs `forbidden` distinction).
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _ctx: &RequestContext, principal: Option<&Principal>, _action: &str, _resource: &str) -> Result<()> {
        require_principal(principal)?;
        Ok(())
    }
}

/// Always denies.
pub struct DenyAll;

#[async_trait]
impl Authorizer for DenyAll {
    async fn authorize(&self, _ctx: &RequestContext, principal: Option<&Principal>, _action: &str, _resource: &str) -> Result<()> {
        require_principal(principal)?;
        Err(Error::Forbidden("denied by policy".into()))
    }
}

/// Permits iff every inner authorizer permits.
pub struct CompositeAll {
    inner: Vec<Box<dyn Authorizer>>,
}

impl CompositeAll {
    pub fn new(inner: Vec<Box<dyn Authorizer>>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Authorizer for CompositeAll {
    async fn authorize(&self, ctx: &RequestContext, principal: Option<&Principal>, action: &str, resource: &str) -> Result<()> {
        for authorizer in &self.inner {
            authorizer.authorize(ctx, principal, action, resource).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn role_any_permits_on_partial_match() {
        let authorizer = RoleAny::new(["admin", "superuser"]);
        let ctx = RequestContext::new("req-1");
        let principal = Principal::new("user:1").with_roles(["admin"]);
        authorizer.authorize(&ctx, Some(&principal), "x", "y").await.unwrap();
    }

    #[tokio::test]
    async fn role_all_requires_every_role() {
        let authorizer = RoleAll::new(["admin", "superuser"]);
        let ctx = RequestContext::new("req-1");
        let principal = Principal::new("user:1").with_roles(["admin"]);
        assert!(authorizer.authorize(&ctx, Some(&principal), "x", "y").await.is_err());
    }

    #[tokio::test]
    async fn composite_all_requires_every_inner_authorizer() {
        let composite = CompositeAll::new(vec![Box::new(AllowAll), Box::new(DenyAll)]);
        let ctx = RequestContext::new("req-1");
        let principal = Principal::new("user:1");
        assert!(composite.authorize(&ctx, Some(&principal), "x", "y").await.is_err());
    }
}
