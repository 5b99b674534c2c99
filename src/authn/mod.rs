//! Authenticators: `Authenticate(ctx, Credentials) -> Principal`.
//!
//! Variants compose: wrap an [`InMemoryAuthenticator`] and a [`jwt::JwtAuthenticator`]
//! in a [`ChainAuthenticator`], then wrap the chain in a [`CachingAuthenticator`]
//! to get a single `Arc<dyn Authenticator>` suitable for a pipeline middleware.

pub mod api_key;
pub mod jwt;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::context::{Credentials, Principal, RequestContext};
use crate::error::{Error, Result};

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, ctx: &RequestContext, credentials: &Credentials) -> Result<Principal>;
}

/// Wraps a synchronous closure as an [`Authenticator`].
pub struct FunctionAuthenticator<F> {
    f: F,
}

impl<F> FunctionAuthenticator<F>
where
    F: Fn(&RequestContext, &Credentials) -> Result<Principal> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Authenticator for FunctionAuthenticator<F>
where
    F: Fn(&RequestContext, &Credentials) -> Result<Principal> + Send + Sync,
{
    async fn authenticate(&self, ctx: &RequestContext, credentials: &Credentials) -> Result<Principal> {
        (self.f)(ctx, credentials)
    }
}

struct TokenEntry {
    principal: Principal,
    expires_at: Option<Instant>,
}

/// Authenticator backed by an in-process token-to-principal map, guarded
/// by a reader-writer lock. `expires_at` is checked on every call.
#[derive(Default)]
pub struct InMemoryAuthenticator {
    tokens: RwLock<HashMap<String, TokenEntry>>,
}

impl InMemoryAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, token: impl Into<String>, principal: Principal, ttl: Option<Duration>) {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.tokens.write().await.insert(token.into(), TokenEntry { principal, expires_at });
    }
}

fn token_from_credentials(credentials: &Credentials) -> Result<&str> {
    match credentials {
        Credentials::Bearer(token) | Credentials::ApiKey(token) => Ok(token.as_str()),
        Credentials::Basic { .. } | Credentials::Internal { .. } => {
            Err(Error::Unauthenticated("in-memory authenticator requires a bearer or api-key token".into()))
        }
    }
}

#[async_trait]
impl Authenticator for InMemoryAuthenticator {
    async fn authenticate(&self, _ctx: &RequestContext, credentials: &Credentials) -> Result<Principal> {
        let token = token_from_credentials(credentials)?;
        let guard = self.tokens.read().await;
        let entry = guard.get(token).ok_or(Error::CredentialsNotFound)?;
        if let Some(exp) = entry.expires_at {
            if Instant::now() >= exp {
                return Err(Error::CredentialsExpired);
            }
        }
        Ok(entry.principal.clone())
    }
}

/// Tries each inner authenticator in declaration order and returns the
/// first success, or the *last* error if every member fails. Constructing
/// a chain with zero members fails fast.
pub struct ChainAuthenticator {
    members: Vec<Arc<dyn Authenticator>>,
}

impl ChainAuthenticator {
    pub fn new(members: Vec<Arc<dyn Authenticator>>) -> Result<Self> {
        if members.is_empty() {
            return Err(Error::Internal("authenticator chain requires at least one member".into()));
        }
        Ok(Self { members })
    }
}

#[async_trait]
impl Authenticator for ChainAuthenticator {
    async fn authenticate(&self, ctx: &RequestContext, credentials: &Credentials) -> Result<Principal> {
        let mut last_err: Option<Error> = None;
        for member in &self.members {
            match member.authenticate(ctx, credentials).await {
                Ok(principal) => return Ok(principal),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.expect("chain construction guarantees at least one member was tried"))
    }
}

struct CacheEntry {
    principal: Principal,
    expires_at: Instant,
}

fn cache_key(credentials: &Credentials) -> Option<String> {
    match credentials {
        Credentials::Bearer(token) => Some(format!("bearer:{token}")),
        Credentials::ApiKey(token) => Some(format!("apikey:{token}")),
        Credentials::Basic { username, .. } => Some(format!("basic:{username}")),
        Credentials::Internal { .. } => None,
    }
}

/// Wraps another authenticator with a hint cache. A cache hit does not
/// short-circuit: the wrapped authenticator still runs on every call, so
/// it can re-check expiry and revocation. The cache exists to let callers
/// observe "this identity was seen recently" and to bound cache size by
/// TTL, not to skip verification.
pub struct CachingAuthenticator {
    inner: Arc<dyn Authenticator>,
    cache: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl CachingAuthenticator {
    pub fn new(inner: Arc<dyn Authenticator>, ttl: Duration) -> Self {
        Self { inner, cache: DashMap::new(), ttl }
    }

    /// Whether a live (non-expired) cache entry exists for these credentials.
    pub fn is_cached(&self, credentials: &Credentials) -> bool {
        match cache_key(credentials) {
            Some(key) => self.cache.get(&key).is_some_and(|e| Instant::now() < e.expires_at),
            None => false,
        }
    }
}

#[async_trait]
impl Authenticator for CachingAuthenticator {
    async fn authenticate(&self, ctx: &RequestContext, credentials: &Credentials) -> Result<Principal> {
        let key = cache_key(credentials);
        let principal = self.inner.authenticate(ctx, credentials).await?;
        if let Some(key) = key {
            self.cache.insert(key, CacheEntry { principal: principal.clone(), expires_at: Instant::now() + self.ttl });
        }
        Ok(principal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RejectingAuthenticator {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Authenticator for RejectingAuthenticator {
        async fn authenticate(&self, _ctx: &RequestContext, _credentials: &Credentials) -> Result<Principal> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::InvalidCredentials("rejected".into()))
        }
    }

    #[tokio::test]
    async fn chain_returns_first_success() {
        let mem = Arc::new(InMemoryAuthenticator::new());
        mem.register("token-x", Principal::new("user:u1"), None).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let rejecting: Arc<dyn Authenticator> = Arc::new(RejectingAuthenticator { calls: calls.clone() });
        let chain = ChainAuthenticator::new(vec![rejecting, mem]).unwrap();

        let ctx = RequestContext::new("req-1");
        let principal = chain.authenticate(&ctx, &Credentials::Bearer("token-x".into())).await.unwrap();
        assert_eq!(principal.id, "user:u1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn chain_returns_last_error_when_all_fail() {
        let calls = Arc::new(AtomicUsize::new(0));
        let a: Arc<dyn Authenticator> = Arc::new(RejectingAuthenticator { calls: calls.clone() });
        let b: Arc<dyn Authenticator> = Arc::new(RejectingAuthenticator { calls });
        let chain = ChainAuthenticator::new(vec![a, b]).unwrap();

        let ctx = RequestContext::new("req-1");
        let err = chain.authenticate(&ctx, &Credentials::Bearer("nope".into())).await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials(_)));
    }

    #[test]
    fn empty_chain_fails_at_construction() {
        assert!(ChainAuthenticator::new(Vec::new()).is_err());
    }

    #[tokio::test]
    async fn in_memory_authenticator_rejects_expired_token() {
        let mem = InMemoryAuthenticator::new();
        mem.register("token-x", Principal::new("user:u1"), Some(Duration::from_millis(10))).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let ctx = RequestContext::new("req-1");
        let err = mem.authenticate(&ctx, &Credentials::Bearer("token-x".into())).await.unwrap_err();
        assert!(matches!(err, Error::CredentialsExpired));
    }

    #[tokio::test]
    async fn caching_authenticator_always_revalidates_through_wrapped() {
        let mem = Arc::new(InMemoryAuthenticator::new());
        mem.register("token-x", Principal::new("user:u1"), None).await;
        let caching = CachingAuthenticator::new(mem.clone(), Duration::from_secs(60));

        let ctx = RequestContext::new("req-1");
        let creds = Credentials::Bearer("token-x".into());

        let first = caching.authenticate(&ctx, &creds).await.unwrap();
        assert_eq!(first.id, "user:u1");
        assert!(caching.is_cached(&creds));

        // Revoke behind the cache's back: the wrapped authenticator must
        // still be consulted, so the caching wrapper surfaces the error
        // instead of serving a stale cached principal.
        mem.tokens.write().await.remove("token-x");
        let second = caching.authenticate(&ctx, &creds).await;
        assert!(second.is_err());
    }
}
