//! Request-scoped data model: credentials, principal, and `RequestContext`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Raw credential material extracted from the wire before verification.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// `Authorization: Bearer <token>` (HTTP) or `authorization` metadata (RPC)
    Bearer(String),
    /// `X-API-Key` header or `x-api-key` metadata
    ApiKey(String),
    /// HTTP Basic auth
    Basic { username: String, password: String },
    /// A request carrying an internal-service whitelist header; bypasses
    /// normal authentication per the platform/internal-service allowance.
    Internal { service: String },
}

/// What kind of caller a [`Principal`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    User,
    Service,
    ApiKey,
}

/// An authenticated and (optionally) authorized caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    /// Stable identifier, e.g. `user:123` or `client:billing-service`.
    pub id: String,

    /// What kind of caller this is: an end user, an internal service, or a
    /// caller authenticated via a long-lived API key.
    #[serde(default = "default_principal_kind")]
    pub kind: PrincipalKind,

    /// Display name, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Roles assigned directly to this principal.
    #[serde(default)]
    pub roles: Vec<String>,

    /// Permission strings assigned directly to this principal, independent
    /// of role membership (checked before role-derived permissions).
    #[serde(default)]
    pub permissions: Vec<String>,

    /// Free-form attributes carried from the credential (claims, scopes).
    #[serde(default)]
    pub attributes: HashMap<String, String>,

    /// When this principal stops being valid for authorization. Checked on
    /// every `Authorizer::authorize` call, not just at authentication time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_principal_kind() -> PrincipalKind {
    PrincipalKind::User
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: PrincipalKind::User,
            name: None,
            roles: Vec::new(),
            permissions: Vec::new(),
            attributes: HashMap::new(),
            expires_at: None,
        }
    }

    pub fn with_kind(mut self, kind: PrincipalKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_permissions(mut self, perms: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.permissions = perms.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_user(&self) -> bool {
        self.id.starts_with("user:")
    }

    pub fn is_client(&self) -> bool {
        self.id.starts_with("client:")
    }

    /// True once `expires_at` (if set) is in the past.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| exp <= Utc::now())
    }

    /// Check the permission grammar directly against this principal's own
    /// permission list (not its roles). `action:resource`, bare `*`, or a
    /// `resource:*` wildcard suffix.
    pub fn has_permission(&self, required: &str) -> bool {
        self.permissions.iter().any(|p| permission_matches(p, required))
    }
}

/// Returns true if `granted` authorizes `required` per the permission grammar:
/// exact match, bare `*` matches everything, and a trailing `:*` on the
/// resource half matches any resource with that prefix.
pub fn permission_matches(granted: &str, required: &str) -> bool {
    if granted == "*" || granted == required {
        return true;
    }
    if let Some(prefix) = granted.strip_suffix(":*") {
        return required.starts_with(prefix) && required[prefix.len()..].starts_with(':');
    }
    false
}

/// Per-request execution context threaded through middleware, rate
/// limiters, semaphores, and the timeout machinery.
#[derive(Clone)]
pub struct RequestContext {
    /// Correlation id for this request (propagated across hops).
    pub request_id: String,

    /// Authenticated principal, if authentication has run.
    pub principal: Option<Principal>,

    /// Absolute deadline by which the request must complete, if any.
    deadline: Option<Instant>,

    /// Cancellation signal tied to the deadline and to explicit aborts
    /// (e.g. a saga compensating, a client disconnect).
    pub cancellation: CancellationToken,

    /// Arbitrary request-scoped metadata (route pattern, tenant id, ...).
    pub metadata: HashMap<String, String>,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            principal: None,
            deadline: None,
            cancellation: CancellationToken::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.with_deadline(deadline)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time remaining until the deadline. `None` means no deadline is set
    /// (treated as unbounded). A duration of zero means the deadline has
    /// already passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(d) if d.is_zero())
    }

    /// Derive a child context whose deadline is `min(timeout, remaining of self)`.
    /// Deadlines only ever shrink across hops, never grow.
    pub fn cascade(&self, timeout: Duration) -> RequestContext {
        let mut child = self.clone();
        child.cancellation = self.cancellation.child_token();
        let candidate = Instant::now() + timeout;
        child.deadline = Some(match self.deadline {
            Some(parent) => candidate.min(parent),
            None => candidate,
        });
        child
    }

    /// Derive a child context whose deadline is `remaining(self) - buffer`,
    /// reserving `buffer` for unwind/cleanup work. If the result would be
    /// non-positive the child is already cancelled.
    pub fn shrink_by(&self, buffer: Duration) -> RequestContext {
        let mut child = self.clone();
        child.cancellation = self.cancellation.child_token();
        match self.remaining() {
            Some(remaining) if remaining > buffer => {
                child.deadline = Some(Instant::now() + (remaining - buffer));
            }
            Some(_) => {
                child.deadline = Some(Instant::now());
                child.cancellation.cancel();
            }
            None => {
                // No parent deadline: buffer has nothing to shrink from.
            }
        }
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn principal_with_no_expiry_is_never_expired() {
        let principal = Principal::new("user:1");
        assert!(!principal.is_expired());
    }

    #[test]
    fn principal_past_expires_at_is_expired() {
        let principal = Principal::new("user:1").with_expires_at(Utc::now() - ChronoDuration::seconds(1));
        assert!(principal.is_expired());
    }

    #[test]
    fn permission_exact_match() {
        assert!(permission_matches("read:orders", "read:orders"));
        assert!(!permission_matches("read:orders", "write:orders"));
    }

    #[test]
    fn permission_bare_wildcard() {
        assert!(permission_matches("*", "delete:anything"));
    }

    #[test]
    fn permission_resource_wildcard_prefix() {
        assert!(permission_matches("orders:*", "orders:123"));
        assert!(!permission_matches("orders:*", "invoices:123"));
    }

    #[test]
    fn cascade_never_extends_parent_deadline() {
        let parent = RequestContext::new("req-1").with_timeout(Duration::from_secs(2));
        let child = parent.cascade(Duration::from_secs(5));
        let remaining = child.remaining().unwrap();
        assert!(remaining <= Duration::from_secs(2));
    }

    #[test]
    fn cascade_with_no_parent_deadline_uses_requested_timeout() {
        let parent = RequestContext::new("req-1");
        let child = parent.cascade(Duration::from_secs(3));
        assert!(child.remaining().unwrap() <= Duration::from_secs(3));
    }

    #[test]
    fn shrink_by_reserves_buffer() {
        let parent = RequestContext::new("req-1").with_timeout(Duration::from_secs(10));
        let child = parent.shrink_by(Duration::from_secs(2));
        let remaining = child.remaining().unwrap();
        assert!(remaining <= Duration::from_secs(8));
    }

    #[test]
    fn shrink_by_cancels_when_buffer_exceeds_remaining() {
        let parent = RequestContext::new("req-1").with_timeout(Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(20));
        let child = parent.shrink_by(Duration::from_secs(1));
        assert!(child.cancellation.is_cancelled());
    }
}
