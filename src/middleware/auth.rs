//! Axum bridge for the protocol-agnostic authn/authz stack: credential
//! extraction from a live HTTP request, an `authenticate` layer that
//! attaches the resulting [`RequestContext`] to request extensions, and a
//! `require_permission` layer that reads that same context back rather
//! than re-deriving it.

use std::future::Future;
use std::pin::Pin;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::authz::Authorizer;
use crate::context::{Credentials, RequestContext};
use crate::error::Error;
use crate::ids::RequestId;
use crate::state::AppState;

const API_KEY_HEADER: &str = "x-api-key";
const ACCESS_TOKEN_PARAM: &str = "access_token=";

/// Extracts wire credentials in priority order: `Authorization: Bearer`,
/// then `X-API-Key`, then an `access_token` query parameter.
pub fn extract_credentials(headers: &HeaderMap, query: Option<&str>) -> Option<Credentials> {
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(Credentials::Bearer(token.to_string()));
    }

    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(Credentials::ApiKey(key.to_string()));
    }

    if let Some(query) = query {
        for pair in query.split('&') {
            if let Some(token) = pair.strip_prefix(ACCESS_TOKEN_PARAM) {
                return Some(Credentials::Bearer(token.to_string()));
            }
        }
    }

    None
}

fn request_id_from(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| RequestId::new().to_string_id())
}

/// Authenticates the request and attaches a [`RequestContext`] to its
/// extensions. A request with no extractable credentials passes through
/// with an unauthenticated context; `require_permission` is what rejects
/// it. A request with credentials the configured authenticator rejects
/// fails fast here.
pub async fn authenticate(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let mut ctx = RequestContext::new(request_id_from(req.headers()));
    let credentials = extract_credentials(req.headers(), req.uri().query());

    if let Some(credentials) = credentials {
        match state.authenticator() {
            Some(authenticator) => match authenticator.authenticate(&ctx, &credentials).await {
                Ok(principal) => ctx.principal = Some(principal),
                Err(err) => return err.into_response(),
            },
            None => {
                return Error::Internal("credentials present but no authenticator is configured".into())
                    .into_response();
            }
        }
    }

    req.extensions_mut().insert(ctx);
    next.run(req).await
}

async fn authorize_and_continue(
    state: AppState,
    req: Request,
    next: Next,
    action: &'static str,
    resource: &'static str,
) -> Response {
    let Some(ctx) = req.extensions().get::<RequestContext>().cloned() else {
        return Error::Internal("request context missing; run the authenticate layer first".into())
            .into_response();
    };

    let Some(authorizer) = state.authorizer() else {
        return Error::Internal("no authorizer is configured".into()).into_response();
    };

    match authorizer.authorize(&ctx, ctx.principal.as_ref(), action, resource).await {
        Ok(()) => next.run(req).await,
        Err(err) => err.into_response(),
    }
}

/// Builds an axum middleware that authorizes `action` on `resource` using
/// the [`RequestContext`] the `authenticate` layer already attached,
/// instead of re-extracting and re-authenticating credentials.
pub fn require_permission(
    action: &'static str,
    resource: &'static str,
) -> impl Fn(State<AppState>, Request, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Clone {
    move |State(state): State<AppState>, req: Request, next: Next| {
        Box::pin(authorize_and_continue(state, req, next, action, resource))
    }
}
