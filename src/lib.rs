//! # meridian-service
//!
//! A request-path control plane toolkit for axum/tower services: a single
//! middleware composition model through which authentication, RBAC
//! authorization, rate limiting, concurrency limiting, timeouts, retry,
//! sagas, and scheduled jobs all compose, plus the protocol-agnostic
//! coordination primitives (`RequestContext`, `Pipeline`) that tie them
//! together.
//!
//! ## Example
//!
//! ```rust,no_run
//! use meridian_service::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!
//!     let state = AppState::builder()
//!         .config(config.clone())
//!         .build();
//!
//!     let app = Router::new()
//!         .route("/health", get(health))
//!         .route("/ready", get(readiness))
//!         .with_state(state);
//!
//!     Server::new(config).serve(app).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod authn;
pub mod authz;
pub mod collaborators;
pub mod concurrency;
pub mod config;
pub mod context;
pub mod error;
pub mod health;
pub mod ids;
pub mod middleware;
pub mod observability;
pub mod pipeline;
pub mod ratelimit;
pub mod responses;
pub mod retry;
pub mod saga;
pub mod scheduler;
pub mod server;
pub mod state;
pub mod timeout;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{
        ApiKeyConfig, AuthConfig, Config, ConcurrencyConfig, JwtConfig, ObservabilityConfig,
        PasswordConfig, RateLimitConfig, RouteRateLimitConfig, SagaConfig, SchedulerConfig,
        ServiceConfig, TimeoutConfig,
    };

    pub use crate::error::{Error, Result};

    pub use crate::context::{Credentials, Principal, PrincipalKind, RequestContext};

    pub use crate::pipeline::{BoxFuture, Handler, Middleware, Pipeline};

    pub use crate::authn::{
        Authenticator, CachingAuthenticator, ChainAuthenticator, FunctionAuthenticator,
        InMemoryAuthenticator,
    };
    pub use crate::authn::api_key::ApiKeyAuthenticator;
    pub use crate::authn::jwt::JwtAuthenticator;

    pub use crate::authz::{
        AllowAll, Authorizer, CompositeAll, DenyAll, PermissionAll, PermissionAny, RbacAuthorizer,
        Role, RoleAll, RoleAny, RoleGraph,
    };

    pub use crate::ratelimit::{
        DistributedRateLimiter, FixedWindowRateLimiter, KeyedRateLimiter, RateLimiter,
        SlidingWindowRateLimiter, TokenBucketRateLimiter,
    };

    pub use crate::concurrency::{
        ConcurrencyPolicy, DistributedSemaphore, EndpointMiddleware, LocalCountedSemaphore,
        LocalWeightedSemaphore, Semaphore,
    };

    pub use crate::timeout::TimeoutMiddleware;
    pub use crate::retry::{RetryMiddleware, RetryPolicy};

    pub use crate::saga::{
        Saga, SagaData, SagaRecord, SagaStatus, SagaStep, SagaStore, StepHook, StepResult, StepRetry,
    };

    pub use crate::scheduler::{Job, JobHooks, JobOptions, JobStats, NoopHooks, Scheduler};

    pub use crate::collaborators::{
        Counter, InMemoryCounter, InMemoryKv, InMemoryLocker, InMemoryPublisher, Kv, Locker,
        Logger, MetricsSink, NoopMetricsSink, Publisher, SpanHandle, TraceSpanSink, TracingLogger,
        TracingMetricsSink,
    };

    #[cfg(feature = "redis-backend")]
    pub use crate::collaborators::redis_backend::{RedisCounter, RedisKv, RedisLocker};

    pub use crate::auth::{ApiKey, ApiKeyGenerator, ApiKeyStorage, KvApiKeyStorage, PasswordHasher};

    pub use crate::ids::{MakeTypedRequestId, RequestId, RequestIdError};

    pub use crate::health::{health, readiness};
    pub use crate::middleware::{
        authenticate, extract_credentials, normalize_path, request_id_layer,
        request_id_propagation_layer, require_permission, sensitive_headers_layer,
        CompiledRoutePatterns, RequestTrackingConfig, PROPAGATE_HEADERS, SENSITIVE_HEADERS,
    };
    pub use crate::server::Server;
    pub use crate::state::{AppState, AppStateBuilder};
    pub use crate::responses::{
        Accepted, Conflict, Created, FieldError, NoContent, Success, ValidationError,
    };

    #[cfg(feature = "observability")]
    pub use crate::observability::init_tracing;

    pub use axum::{
        extract::{Path, Query, State},
        http::{HeaderMap, HeaderValue, StatusCode},
        response::{IntoResponse, Json, Response},
        routing::{delete, get, patch, post, put},
        Extension, Router,
    };

    pub use serde::{Deserialize, Serialize};

    pub use tracing::{debug, error, info, instrument, trace, warn, Level, Span};

    pub use tokio;

    pub use async_trait::async_trait;

    pub use thiserror::Error;
    pub use anyhow::{self, Context as AnyhowContext};

    pub use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};

    pub use uuid::Uuid;

    pub use futures::{future, stream, Future, Stream, StreamExt, TryFutureExt, TryStreamExt};

    pub use http::{Method, Uri};
}
