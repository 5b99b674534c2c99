//! API-key authenticator: looks a key up against an [`ApiKeyStorage`] and
//! verifies it with constant-time Argon2id comparison.

use std::sync::Arc;

use async_trait::async_trait;

use crate::auth::api_keys::{ApiKey, ApiKeyGenerator, ApiKeyStorage};
use crate::context::{Credentials, Principal, PrincipalKind, RequestContext};
use crate::error::{Error, Result};

use super::Authenticator;

pub struct ApiKeyAuthenticator {
    storage: Arc<dyn ApiKeyStorage>,
    generator: ApiKeyGenerator,
}

impl ApiKeyAuthenticator {
    pub fn new(storage: Arc<dyn ApiKeyStorage>, prefix: impl Into<String>) -> Self {
        Self { storage, generator: ApiKeyGenerator::new(prefix) }
    }

    fn principal_from_record(key: ApiKey) -> Principal {
        let mut principal = Principal::new(format!("user:{}", key.user_id))
            .with_kind(PrincipalKind::ApiKey)
            .with_permissions(key.scopes);
        principal.expires_at = key.expires_at;
        principal
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    async fn authenticate(&self, _ctx: &RequestContext, credentials: &Credentials) -> Result<Principal> {
        let presented = match credentials {
            Credentials::ApiKey(key) => key,
            _ => return Err(Error::Unauthenticated("api-key authenticator requires an api-key credential".into())),
        };

        let record = self
            .storage
            .get_by_key(presented)
            .await?
            .ok_or(Error::CredentialsNotFound)?;

        if !record.is_valid() {
            return Err(Error::CredentialsExpired);
        }

        if !self.generator.verify(presented, &record.key_hash)? {
            return Err(Error::InvalidCredentials("api key does not match stored hash".into()));
        }

        self.storage.update_last_used(&record.id).await?;
        Ok(Self::principal_from_record(record))
    }
}
