//! API key generation, verification, and storage.
//!
//! API keys follow the format `{prefix}_{random_base32}`. The plaintext key
//! is shown to the caller exactly once; only its Argon2id hash is retained.
//!
//! # Example
//!
//! ```rust,ignore
//! use meridian_service::auth::{ApiKeyGenerator, ApiKey};
//!
//! let generator = ApiKeyGenerator::new("sk_live");
//!
//! // Generate a new API key
//! let (key, key_hash) = generator.generate();
//! // key = "sk_live_abc123..." (show to user once)
//! // key_hash = "$argon2id$..." (store in the backing store)
//!
//! // Later, verify an incoming key
//! if generator.verify(&incoming_key, &stored_hash)? {
//!     // Key is valid
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::password::PasswordHasher;
use crate::collaborators::Kv;
use crate::error::{Error, Result};

/// A provisioned API key record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub user_id: String,
    pub name: String,

    /// Generator prefix (e.g. `sk_live`), shared by every key from the
    /// same generator. Not to be confused with per-key lookup indexing.
    pub prefix: String,

    /// Argon2id hash of the full key. Never store the plaintext key.
    pub key_hash: String,

    #[serde(default)]
    pub scopes: Vec<String>,

    pub rate_limit: Option<u32>,

    #[serde(default)]
    pub is_revoked: bool,

    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    pub fn is_valid(&self) -> bool {
        if self.is_revoked {
            return false;
        }
        if let Some(expires_at) = self.expires_at {
            if expires_at < Utc::now() {
                return false;
            }
        }
        true
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Generates and verifies API keys of the form `{prefix}_{random_base32}`,
/// hashed with Argon2id before storage.
#[derive(Clone)]
pub struct ApiKeyGenerator {
    prefix: String,
    hasher: PasswordHasher,
}

impl ApiKeyGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), hasher: PasswordHasher::default() }
    }

    /// Returns `(plaintext_key, argon2_hash)`. The plaintext is shown once.
    pub fn generate(&self) -> (String, String) {
        let random_bytes: [u8; 24] = rand::random();
        let encoded = base32_encode(&random_bytes);
        let key = format!("{}_{}", self.prefix, encoded);
        let hash = self.hasher.hash(&key).expect("argon2 hashing of a freshly generated key cannot fail");
        (key, hash)
    }

    pub fn verify(&self, key: &str, hash: &str) -> Result<bool> {
        self.hasher.verify(key, hash)
    }

    /// Extracts the generator prefix from a presented key (the text before
    /// the first underscore-delimited random segment).
    pub fn extract_prefix(key: &str) -> Option<&str> {
        key.rsplit_once('_').map(|(prefix, _)| prefix)
    }

    /// First 8 characters of the random segment, joined with the prefix —
    /// usable as a non-secret index without storing the full key.
    pub fn key_prefix_for_lookup(key: &str) -> Option<String> {
        let (prefix, random) = key.rsplit_once('_')?;
        if random.len() >= 8 {
            Some(format!("{prefix}_{}", &random[..8]))
        } else {
            None
        }
    }
}

fn base32_encode(bytes: &[u8]) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz234567";

    let mut result = String::with_capacity((bytes.len() * 8).div_ceil(5));
    let mut buffer = 0u64;
    let mut bits = 0;

    for &byte in bytes {
        buffer = (buffer << 8) | byte as u64;
        bits += 8;

        while bits >= 5 {
            bits -= 5;
            let index = ((buffer >> bits) & 0x1f) as usize;
            result.push(ALPHABET[index] as char);
        }
    }

    if bits > 0 {
        let index = ((buffer << (5 - bits)) & 0x1f) as usize;
        result.push(ALPHABET[index] as char);
    }

    result
}

/// Storage seam for API key records, independent of the backing database.
#[async_trait]
pub trait ApiKeyStorage: Send + Sync {
    async fn get_by_key(&self, key: &str) -> Result<Option<ApiKey>>;
    async fn get_by_prefix(&self, prefix: &str) -> Result<Option<ApiKey>>;
    async fn get_by_id(&self, id: &str) -> Result<Option<ApiKey>>;
    async fn create(&self, key: &ApiKey) -> Result<()>;
    async fn update_last_used(&self, id: &str) -> Result<()>;
    async fn revoke(&self, id: &str) -> Result<()>;
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<ApiKey>>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// `ApiKeyStorage` over the generic `Kv` collaborator, so any deployment
/// that already has a `Kv` (in-memory or Redis-backed) gets API key
/// storage for free. Indexes by generator prefix; deployments minting many
/// keys from a single generator with high lookup volume should provide a
/// dedicated `ApiKeyStorage` instead.
pub struct KvApiKeyStorage {
    kv: Arc<dyn Kv>,
}

impl KvApiKeyStorage {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    fn id_key(id: &str) -> String {
        format!("apikey:id:{id}")
    }

    fn prefix_bucket_key(prefix: &str) -> String {
        format!("apikey:prefix:{prefix}")
    }

    fn user_bucket_key(user_id: &str) -> String {
        format!("apikey:user:{user_id}")
    }

    async fn bucket_ids(&self, key: &str) -> Result<Vec<String>> {
        match self.kv.get(key).await? {
            Some(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| Error::Internal(e.to_string()))
            }
            None => Ok(Vec::new()),
        }
    }

    async fn push_bucket(&self, key: &str, id: &str) -> Result<()> {
        let mut ids = self.bucket_ids(key).await?;
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
            let bytes = serde_json::to_vec(&ids).map_err(|e| Error::Internal(e.to_string()))?;
            self.kv.set(key, bytes, None).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ApiKeyStorage for KvApiKeyStorage {
    async fn get_by_key(&self, key: &str) -> Result<Option<ApiKey>> {
        match ApiKeyGenerator::extract_prefix(key) {
            Some(prefix) => self.get_by_prefix(prefix).await,
            None => Ok(None),
        }
    }

    async fn get_by_prefix(&self, prefix: &str) -> Result<Option<ApiKey>> {
        for id in self.bucket_ids(&Self::prefix_bucket_key(prefix)).await? {
            if let Some(key) = self.get_by_id(&id).await? {
                return Ok(Some(key));
            }
        }
        Ok(None)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<ApiKey>> {
        match self.kv.get(&Self::id_key(id)).await? {
            Some(bytes) => {
                Ok(Some(serde_json::from_slice(&bytes).map_err(|e| Error::Internal(e.to_string()))?))
            }
            None => Ok(None),
        }
    }

    async fn create(&self, key: &ApiKey) -> Result<()> {
        let bytes = serde_json::to_vec(key).map_err(|e| Error::Internal(e.to_string()))?;
        self.kv.set(&Self::id_key(&key.id), bytes, None).await?;
        self.push_bucket(&Self::prefix_bucket_key(&key.prefix), &key.id).await?;
        self.push_bucket(&Self::user_bucket_key(&key.user_id), &key.id).await?;
        Ok(())
    }

    async fn update_last_used(&self, id: &str) -> Result<()> {
        if let Some(mut key) = self.get_by_id(id).await? {
            key.last_used_at = Some(Utc::now());
            let bytes = serde_json::to_vec(&key).map_err(|e| Error::Internal(e.to_string()))?;
            self.kv.set(&Self::id_key(id), bytes, None).await?;
        }
        Ok(())
    }

    async fn revoke(&self, id: &str) -> Result<()> {
        if let Some(mut key) = self.get_by_id(id).await? {
            key.is_revoked = true;
            let bytes = serde_json::to_vec(&key).map_err(|e| Error::Internal(e.to_string()))?;
            self.kv.set(&Self::id_key(id), bytes, None).await?;
        }
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<ApiKey>> {
        let mut keys = Vec::new();
        for id in self.bucket_ids(&Self::user_bucket_key(user_id)).await? {
            if let Some(key) = self.get_by_id(&id).await? {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.kv.del(&[Self::id_key(id).as_str()]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryKv;

    #[test]
    fn generate_then_verify_round_trips() {
        let generator = ApiKeyGenerator::new("sk_live");
        let (key, hash) = generator.generate();
        assert!(key.starts_with("sk_live_"));
        assert!(generator.verify(&key, &hash).unwrap());
        assert!(!generator.verify("wrong_key", &hash).unwrap());
    }

    #[test]
    fn extract_prefix_handles_multi_segment_prefixes() {
        assert_eq!(ApiKeyGenerator::extract_prefix("sk_live_abcdefgh"), Some("sk_live"));
        assert_eq!(ApiKeyGenerator::extract_prefix("noSeparator"), None);
    }

    #[tokio::test]
    async fn kv_storage_roundtrip() {
        let storage = KvApiKeyStorage::new(Arc::new(InMemoryKv::new()));
        let generator = ApiKeyGenerator::new("mk");
        let (key, hash) = generator.generate();

        let record = ApiKey {
            id: "key-1".to_string(),
            user_id: "user-1".to_string(),
            name: "ci token".to_string(),
            prefix: "mk".to_string(),
            key_hash: hash,
            scopes: vec!["read:orders".to_string()],
            rate_limit: None,
            is_revoked: false,
            last_used_at: None,
            expires_at: None,
            created_at: Utc::now(),
        };
        storage.create(&record).await.unwrap();

        let fetched = storage.get_by_key(&key).await.unwrap().unwrap();
        assert_eq!(fetched.id, "key-1");
        assert!(generator.verify(&key, &fetched.key_hash).unwrap());

        let by_user = storage.list_by_user("user-1").await.unwrap();
        assert_eq!(by_user.len(), 1);

        storage.revoke("key-1").await.unwrap();
        let revoked = storage.get_by_id("key-1").await.unwrap().unwrap();
        assert!(!revoked.is_valid());
    }
}
