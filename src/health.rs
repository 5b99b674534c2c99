//! Health check handlers: liveness, readiness, and collaborator status.
//!
//! Readiness probes each collaborator wired into [`AppState`] through its
//! trait interface only (a round-trip `Kv`/`Counter` operation, a
//! self-owned `Locker` probe) — this toolkit never knows or cares whether
//! the collaborator behind the trait is Redis, Postgres, or an in-memory
//! stand-in.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::state::AppState;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service name
    pub service: String,

    /// Version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Readiness check response with dependency status
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// Overall readiness status
    pub ready: bool,

    /// Service name
    pub service: String,

    /// Dependency statuses
    pub dependencies: HashMap<String, DependencyStatus>,
}

/// Individual dependency status
#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    /// Dependency is healthy
    pub healthy: bool,

    /// Optional message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Simple health check (liveness probe).
///
/// Always returns 200 OK if the service process is running; used by
/// orchestrators to decide whether to restart the pod/container.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        service: state.config().service.name.clone(),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    };

    (StatusCode::OK, Json(response))
}

const READINESS_PROBE_KEY: &str = "__meridian_readiness_probe__";

/// Readiness check with collaborator validation (readiness probe).
///
/// Returns 200 OK if every configured collaborator answered its probe;
/// 503 Service Unavailable otherwise. Used by orchestrators to decide
/// whether the pod should receive traffic.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let mut dependencies = HashMap::new();
    let mut all_ready = true;

    if let Some(kv) = state.kv() {
        let outcome = async {
            kv.set(READINESS_PROBE_KEY, b"1".to_vec(), Some(Duration::from_secs(5))).await?;
            kv.get(READINESS_PROBE_KEY).await
        }
        .await;

        match outcome {
            Ok(_) => {
                dependencies.insert(
                    "kv".to_string(),
                    DependencyStatus { healthy: true, message: Some("reachable".to_string()) },
                );
            }
            Err(e) => {
                all_ready = false;
                tracing::error!("kv readiness probe failed: {}", e);
                dependencies.insert(
                    "kv".to_string(),
                    DependencyStatus { healthy: false, message: Some(e.to_string()) },
                );
            }
        }
    }

    if let Some(counter) = state.counter() {
        match counter.increment_by(READINESS_PROBE_KEY, 0).await {
            Ok(_) => {
                dependencies.insert(
                    "counter".to_string(),
                    DependencyStatus { healthy: true, message: Some("reachable".to_string()) },
                );
            }
            Err(e) => {
                all_ready = false;
                tracing::error!("counter readiness probe failed: {}", e);
                dependencies.insert(
                    "counter".to_string(),
                    DependencyStatus { healthy: false, message: Some(e.to_string()) },
                );
            }
        }
    }

    if let Some(locker) = state.locker() {
        let probe_owner = "readiness-probe";
        match locker.try_lock(READINESS_PROBE_KEY, probe_owner, Duration::from_secs(1)).await {
            Ok(_) => {
                let _ = locker.unlock(READINESS_PROBE_KEY, probe_owner).await;
                dependencies.insert(
                    "locker".to_string(),
                    DependencyStatus { healthy: true, message: Some("reachable".to_string()) },
                );
            }
            Err(e) => {
                all_ready = false;
                tracing::error!("locker readiness probe failed: {}", e);
                dependencies.insert(
                    "locker".to_string(),
                    DependencyStatus { healthy: false, message: Some(e.to_string()) },
                );
            }
        }
    }

    let response = ReadinessResponse {
        ready: all_ready,
        service: state.config().service.name.clone(),
        dependencies,
    };

    let status = if all_ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{InMemoryCounter, InMemoryKv, InMemoryLocker};
    use std::sync::Arc;

    #[tokio::test]
    async fn health_always_reports_healthy() {
        let state = AppState::builder().without_tracing().build();
        let response = health(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_is_ready_with_no_collaborators_configured() {
        let state = AppState::builder().without_tracing().build();
        let response = readiness(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_probes_every_configured_collaborator() {
        let state = AppState::builder()
            .without_tracing()
            .kv(Arc::new(InMemoryKv::new()))
            .counter(Arc::new(InMemoryCounter::new()))
            .locker(Arc::new(InMemoryLocker::new()))
            .build();

        let response = readiness(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
