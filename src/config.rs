//! Layered configuration using Figment.
//!
//! Precedence (highest to lowest): environment variables (prefix `MERIDIAN_`),
//! current working directory (`./config.toml`), XDG config directory
//! (`~/.config/meridian-service/{service_name}/config.toml`), system directory
//! (`/etc/meridian-service/{service_name}/config.toml`), compiled defaults.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// Root configuration structure. Section names match the TOML tables
/// (`[service]`, `[auth]`, `[rate_limit]`, `[concurrency]`, `[timeout]`,
/// `[saga]`, `[scheduler]`, `[observability]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    #[serde(default)]
    pub timeout: TimeoutConfig,

    #[serde(default)]
    pub saga: SagaConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Authentication configuration: password hashing, JWT verification/issuing,
/// API key handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub password: PasswordConfig,

    #[serde(default)]
    pub jwt: Option<JwtConfig>,

    #[serde(default)]
    pub api_keys: ApiKeyConfig,

    /// How long a caching authenticator may serve a previously-validated
    /// principal before it must revalidate through the wrapped authenticator.
    /// The cache is a hint, never a short-circuit: even on a cache hit the
    /// wrapped authenticator still runs (see design notes).
    #[serde(default = "default_auth_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            password: PasswordConfig::default(),
            jwt: None,
            api_keys: ApiKeyConfig::default(),
            cache_ttl_secs: default_auth_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordConfig {
    #[serde(default = "default_memory_cost_kib")]
    pub memory_cost_kib: u32,
    #[serde(default = "default_time_cost")]
    pub time_cost: u32,
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_cost_kib: default_memory_cost_kib(),
            time_cost: default_time_cost(),
            parallelism: default_parallelism(),
            min_password_length: default_min_password_length(),
        }
    }
}

/// JWT verification (and, if a private key is configured, issuing) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// Path to the public key (verification) in PEM format, or the raw
    /// secret file for HMAC algorithms.
    pub public_key_path: PathBuf,

    /// Path to the private key, required only when this service also
    /// issues tokens.
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,

    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,

    #[serde(default)]
    pub issuer: Option<String>,

    #[serde(default)]
    pub audience: Option<String>,

    #[serde(default = "default_access_token_lifetime_secs")]
    pub access_token_lifetime_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_api_key_prefix")]
    pub prefix: String,

    #[serde(default = "default_api_key_header")]
    pub header: String,
}

impl Default for ApiKeyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: default_api_key_prefix(),
            header: default_api_key_header(),
        }
    }
}

/// Rate limiting configuration. `algorithm` selects which limiter a keyed
/// factory constructs for routes that don't override it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_rate_limit_algorithm")]
    pub algorithm: String,

    #[serde(default = "default_rate_limit")]
    pub limit: u64,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Per-route overrides, keyed by route pattern (see `route_matcher`).
    #[serde(default)]
    pub routes: std::collections::HashMap<String, RouteRateLimitConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: default_rate_limit_algorithm(),
            limit: default_rate_limit(),
            window_secs: default_window_secs(),
            routes: std::collections::HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRateLimitConfig {
    pub limit: u64,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

/// Semaphore configuration for endpoint concurrency control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_concurrency_limit")]
    pub max_concurrent: usize,

    /// `fail-fast` (default) returns 503 immediately when no permit is
    /// available; `block-until-acquire` waits (bounded by the request
    /// deadline) for one to free up.
    #[serde(default = "default_concurrency_policy")]
    pub policy: String,

    #[serde(default = "default_distributed_lock_ttl_secs")]
    pub distributed_lock_ttl_secs: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent: default_concurrency_limit(),
            policy: default_concurrency_policy(),
            distributed_lock_ttl_secs: default_distributed_lock_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_timeout_secs")]
    pub default_secs: u64,

    /// Buffer reserved by `ShrinkBy` for unwind/cleanup work at the edge
    /// of a cascaded deadline.
    #[serde(default = "default_shrink_buffer_ms")]
    pub shrink_buffer_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_secs: default_timeout_secs(),
            shrink_buffer_ms: default_shrink_buffer_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaConfig {
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    #[serde(default = "default_saga_record_ttl_secs")]
    pub record_ttl_secs: u64,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            record_ttl_secs: default_saga_record_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_lock_prefix")]
    pub lock_prefix: String,

    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    #[serde(default = "default_job_timeout_secs")]
    pub default_job_timeout_secs: u64,

    #[serde(default = "default_retry_count")]
    pub default_retry_count: u32,

    #[serde(default = "default_retry_interval_secs")]
    pub default_retry_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lock_prefix: default_lock_prefix(),
            lock_ttl_secs: default_lock_ttl_secs(),
            default_job_timeout_secs: default_job_timeout_secs(),
            default_retry_count: default_retry_count(),
            default_retry_interval_secs: default_retry_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_true")]
    pub tracing_enabled: bool,

    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    #[serde(default = "default_true")]
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            tracing_enabled: true,
            otlp_endpoint: None,
            json_logs: true,
        }
    }
}

// --- default value functions -------------------------------------------------

fn default_port() -> u16 { 8080 }
fn default_log_level() -> String { "info".to_string() }
fn default_environment() -> String { "dev".to_string() }
fn default_true() -> bool { true }

fn default_memory_cost_kib() -> u32 { 65536 } // 64 MiB, OWASP recommendation
fn default_time_cost() -> u32 { 3 }
fn default_parallelism() -> u32 { 4 }
fn default_min_password_length() -> usize { 8 }
fn default_auth_cache_ttl_secs() -> u64 { 60 }

fn default_jwt_algorithm() -> String { "RS256".to_string() }
fn default_access_token_lifetime_secs() -> i64 { 900 }

fn default_api_key_prefix() -> String { "mk".to_string() }
fn default_api_key_header() -> String { "X-API-Key".to_string() }

fn default_rate_limit_algorithm() -> String { "token_bucket".to_string() }
fn default_rate_limit() -> u64 { 100 }
fn default_window_secs() -> u64 { 60 }

fn default_concurrency_limit() -> usize { 100 }
fn default_concurrency_policy() -> String { "fail-fast".to_string() }
fn default_distributed_lock_ttl_secs() -> u64 { 30 }

fn default_timeout_secs() -> u64 { 30 }
fn default_shrink_buffer_ms() -> u64 { 250 }

fn default_saga_record_ttl_secs() -> u64 { 24 * 60 * 60 }

fn default_lock_prefix() -> String { "scheduler:lock:".to_string() }
fn default_lock_ttl_secs() -> u64 { 60 }
fn default_job_timeout_secs() -> u64 { 300 }
fn default_retry_count() -> u32 { 3 }
fn default_retry_interval_secs() -> u64 { 10 }

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl TimeoutConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_secs)
    }

    pub fn shrink_buffer(&self) -> Duration {
        Duration::from_millis(self.shrink_buffer_ms)
    }
}

impl SchedulerConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn default_job_timeout(&self) -> Duration {
        Duration::from_secs(self.default_job_timeout_secs)
    }

    pub fn default_retry_interval(&self) -> Duration {
        Duration::from_secs(self.default_retry_interval_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: "meridian-service".to_string(),
                port: default_port(),
                log_level: default_log_level(),
                environment: default_environment(),
            },
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            timeout: TimeoutConfig::default(),
            saga: SagaConfig::default(),
            scheduler: SchedulerConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from all sources, inferring the service name
    /// from the running binary.
    pub fn load() -> Result<Self> {
        let service_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "meridian-service".to_string());

        Self::load_for_service(&service_name)
    }

    /// Load configuration for a specific service name.
    pub fn load_for_service(service_name: &str) -> Result<Self> {
        let config_paths = Self::find_config_paths(service_name);

        tracing::debug!("searching for config files in order:");
        for path in &config_paths {
            tracing::debug!("  - {}", path.display());
        }

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed("MERIDIAN_").split("_"));

        Ok(figment.extract()?)
    }

    /// Load configuration from a specific file, bypassing XDG/system dirs.
    /// Useful for tests and non-standard deployments.
    pub fn load_from(path: &str) -> Result<Self> {
        let config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("MERIDIAN_").split("_"))
            .extract()?;

        Ok(config)
    }

    fn find_config_paths(service_name: &str) -> Vec<PathBuf> {
        let mut paths = Vec::new();

        paths.push(PathBuf::from("config.toml"));

        let xdg_dirs = xdg::BaseDirectories::with_prefix("meridian-service");
        let config_file_path = Path::new(service_name).join("config.toml");
        if let Ok(path) = xdg_dirs.place_config_file(&config_file_path) {
            paths.push(path);
        }

        paths.push(PathBuf::from("/etc/meridian-service").join(service_name).join("config.toml"));

        paths
    }

    /// Recommended XDG config path for a service.
    pub fn recommended_path(service_name: &str) -> PathBuf {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("meridian-service");
        let config_file_path = Path::new(service_name).join("config.toml");

        xdg_dirs.place_config_file(&config_file_path).unwrap_or_else(|_| {
            PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| String::from("~")))
                .join(".config/meridian-service")
                .join(service_name)
                .join("config.toml")
        })
    }

    /// Create the XDG config directory for a service, returning its path.
    pub fn create_config_dir(service_name: &str) -> Result<PathBuf> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("meridian-service");
        let config_file_path = Path::new(service_name).join("config.toml");

        let config_path = xdg_dirs
            .place_config_file(&config_file_path)
            .map_err(|e| crate::error::Error::Internal(format!("failed to create config directory: {e}")))?;

        Ok(config_path
            .parent()
            .ok_or_else(|| crate::error::Error::Internal("invalid config path".to_string()))?
            .to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = Config::default();
        assert_eq!(config.service.port, 8080);
        assert_eq!(config.rate_limit.limit, 100);
        assert_eq!(config.concurrency.max_concurrent, 100);
        assert_eq!(config.concurrency.policy, "fail-fast");
    }

    #[test]
    fn load_from_layers_toml_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [service]
            name = "orders-service"
            port = 9000

            [rate_limit]
            limit = 50
            window_secs = 30
            "#,
        )
        .unwrap();

        let config = Config::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.service.name, "orders-service");
        assert_eq!(config.service.port, 9000);
        assert_eq!(config.rate_limit.limit, 50);
        assert_eq!(config.rate_limit.window_secs, 30);
        // untouched sections still carry compiled defaults
        assert_eq!(config.concurrency.max_concurrent, 100);
    }

    #[test]
    fn env_vars_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[service]\nname = \"orders-service\"\nport = 9000\n").unwrap();

        std::env::set_var("MERIDIAN_SERVICE_PORT", "9999");
        let config = Config::load_from(path.to_str().unwrap()).unwrap();
        std::env::remove_var("MERIDIAN_SERVICE_PORT");

        assert_eq!(config.service.port, 9999);
    }
}
