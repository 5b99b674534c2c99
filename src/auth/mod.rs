//! Credential material helpers shared by the `authn` module: password
//! hashing (Argon2id) and API key generation/storage. Verification
//! against these lives in [`crate::authn`]; this module only produces
//! and stores the hashed/keyed material that verification checks
//! against.

pub mod api_keys;
pub mod password;

pub use api_keys::{ApiKey, ApiKeyGenerator, ApiKeyStorage, KvApiKeyStorage};
pub use password::PasswordHasher;
