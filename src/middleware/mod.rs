//! Axum-facing middleware: request tracking, security headers, route
//! pattern matching for route-scoped policy configuration, and the `auth`
//! bridge that extracts wire credentials and runs them through the
//! protocol-agnostic authn/authz stack.
//!
//! Authentication and authorization logic itself, along with rate
//! limiting, concurrency limiting, timeouts, retries, sagas, and
//! scheduling, are protocol-agnostic and live under their own top-level
//! modules (`authn`, `authz`, `ratelimit`, `concurrency`, `timeout`,
//! `retry`, `saga`, `scheduler`) so they work the same way whether
//! fronted by HTTP or gRPC.

pub mod auth;
pub mod request_tracking;
pub mod route_matcher;
pub mod security_headers;

pub use auth::{authenticate, extract_credentials, require_permission};
pub use request_tracking::{
    request_id_layer, request_id_propagation_layer, sensitive_headers_layer,
    RequestTrackingConfig, PROPAGATE_HEADERS, SENSITIVE_HEADERS,
};
pub use route_matcher::{normalize_path, CompiledRoutePatterns};
pub use security_headers::apply_security_headers;
