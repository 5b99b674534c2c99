//! JWT authenticator: decodes, verifies signature, checks expiry (with an
//! optional refresh window), and optionally consults a revocation set.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};

use crate::collaborators::Kv;
use crate::config::JwtConfig;
use crate::context::{Credentials, Principal, PrincipalKind, RequestContext};
use crate::error::{Error, Result};

use super::Authenticator;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JwtClaims {
    sub: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    perms: Vec<String>,
    exp: i64,
    #[serde(default)]
    iat: Option<i64>,
    #[serde(default)]
    jti: Option<String>,
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    aud: Option<String>,
}

fn parse_algorithm(raw: &str) -> Result<Algorithm> {
    match raw.to_uppercase().as_str() {
        "RS256" => Ok(Algorithm::RS256),
        "RS384" => Ok(Algorithm::RS384),
        "RS512" => Ok(Algorithm::RS512),
        "ES256" => Ok(Algorithm::ES256),
        "ES384" => Ok(Algorithm::ES384),
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        other => Err(Error::Config(Box::new(figment::Error::from(format!("unsupported JWT algorithm: {other}"))))),
    }
}

fn decoding_key_for(algorithm: Algorithm, key_material: &[u8]) -> Result<DecodingKey> {
    Ok(match algorithm {
        Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => DecodingKey::from_rsa_pem(key_material)?,
        Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(key_material)?,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => DecodingKey::from_secret(key_material),
        other => {
            return Err(Error::Config(Box::new(figment::Error::from(format!(
                "unsupported JWT algorithm: {other:?}"
            )))))
        }
    })
}

/// Authenticates `Bearer` credentials as JWTs.
pub struct JwtAuthenticator {
    decoding_key: DecodingKey,
    validation: Validation,
    /// How long past `exp` an otherwise-valid token is still accepted, to
    /// give clients a grace window to trade it in for a fresh one.
    refresh_window: Duration,
    revocation: Option<Arc<dyn Kv>>,
}

impl JwtAuthenticator {
    pub fn new(config: &JwtConfig) -> Result<Self> {
        let key_material = fs::read(&config.public_key_path).map_err(|e| {
            Error::Config(Box::new(figment::Error::from(format!(
                "failed to read JWT public key from {}: {e}",
                config.public_key_path.display()
            ))))
        })?;

        let algorithm = parse_algorithm(&config.algorithm)?;
        let decoding_key = decoding_key_for(algorithm, &key_material)?;

        let mut validation = Validation::new(algorithm);
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }
        if let Some(audience) = &config.audience {
            validation.set_audience(&[audience]);
        }
        // exp is checked manually below so the refresh window can apply.
        validation.validate_exp = false;

        Ok(Self { decoding_key, validation, refresh_window: Duration::ZERO, revocation: None })
    }

    pub fn with_refresh_window(mut self, window: Duration) -> Self {
        self.refresh_window = window;
        self
    }

    /// Consult `kv` for revocation, keyed on the token's `jti` (falling
    /// back to `sub` when the token carries no `jti`).
    pub fn with_revocation(mut self, kv: Arc<dyn Kv>) -> Self {
        self.revocation = Some(kv);
        self
    }

    fn principal_from_claims(claims: JwtClaims) -> Principal {
        let kind = if claims.sub.starts_with("client:") || claims.sub.starts_with("service:") {
            PrincipalKind::Service
        } else {
            PrincipalKind::User
        };
        let mut principal = Principal::new(claims.sub)
            .with_kind(kind)
            .with_roles(claims.roles)
            .with_permissions(claims.perms);
        principal.name = claims.name;
        if let Some(expires_at) = chrono::DateTime::from_timestamp(claims.exp, 0) {
            principal.expires_at = Some(expires_at);
        }
        if let Some(iss) = claims.iss {
            principal.attributes.insert("iss".to_string(), iss);
        }
        if let Some(aud) = claims.aud {
            principal.attributes.insert("aud".to_string(), aud);
        }
        if let Some(jti) = claims.jti {
            principal.attributes.insert("jti".to_string(), jti);
        }
        principal
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, _ctx: &RequestContext, credentials: &Credentials) -> Result<Principal> {
        let token = match credentials {
            Credentials::Bearer(token) => token,
            _ => return Err(Error::Unauthenticated("jwt authenticator requires a bearer token".into())),
        };

        let data: TokenData<JwtClaims> = decode(token, &self.decoding_key, &self.validation)?;
        let claims = data.claims;

        let now = chrono::Utc::now().timestamp();
        if claims.exp < now {
            let expired_for = Duration::from_secs((now - claims.exp).max(0) as u64);
            if expired_for > self.refresh_window {
                return Err(Error::CredentialsExpired);
            }
        }

        if let Some(kv) = &self.revocation {
            let revocation_id = claims.jti.clone().unwrap_or_else(|| claims.sub.clone());
            if kv.get(&format!("jwt:revoked:{revocation_id}")).await?.is_some() {
                return Err(Error::InvalidCredentials("token has been revoked".into()));
            }
        }

        Ok(Self::principal_from_claims(claims))
    }
}
