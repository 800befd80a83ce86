use axum::{
    Extension,
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_cookies::Cookies;

use crate::{
    clock::SharedClock,
    error::AppError,
    models::principal::{Credential, Principal, RequestId},
    repositories::store::{Store, StoreError},
};

/// Name of the cookie carrying the opaque session token.
pub const SESSION_COOKIE: &str = "session_token";

/// The typed per-request context every later stage and handler reads.
///
/// Only the identity stage can build one, so holding a `RequestContext` proves
/// that the principal has already been resolved for this request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: RequestId,
    principal: Principal,
}

impl RequestContext {
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    #[cfg(test)]
    pub fn for_tests(principal: Principal) -> Self {
        Self {
            request_id: RequestId::new("test-request".to_string()),
            principal,
        }
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or_else(|| {
                AppError::Internal("request context missing: identity stage not installed".to_string())
            })
    }
}

/// Resolves a request's credentials to a [`Principal`].
///
/// Never rejects. Missing, unknown or expired credentials and failed lookups
/// all resolve to `Anonymous`; refusing access is left to the guards.
#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn Store>,
    clock: SharedClock,
    lookup_timeout: Duration,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn Store>, clock: SharedClock, lookup_timeout: Duration) -> Self {
        Self {
            store,
            clock,
            lookup_timeout,
        }
    }

    /// Resolves the principal, trying the session cookie before the bearer token.
    ///
    /// # Arguments
    ///
    /// * `session_token` - The session cookie value, if any.
    /// * `bearer` - The bearer token from the `Authorization` header, if any.
    pub async fn resolve(&self, session_token: Option<&str>, bearer: Option<&str>) -> Principal {
        if let Some(token) = session_token.filter(|t| !t.is_empty()) {
            let found = self
                .bounded_lookup("session", self.store.find_session_by_token(token))
                .await;
            if let Some(session) = found {
                if session.is_active_at(self.clock.now()) {
                    tracing::debug!("✅ Session resolved for user: {}", session.user_id);
                    return Principal::Authenticated {
                        user_id: session.user_id,
                        credential: Credential::Session,
                    };
                }
                tracing::debug!("⌛ Session expired for user: {}", session.user_id);
            }
        }

        if let Some(token) = bearer {
            let found = self
                .bounded_lookup("api token", self.store.find_api_token_by_token(token))
                .await;
            if let Some(api_token) = found {
                if api_token.is_active_at(self.clock.now()) {
                    tracing::debug!("✅ API token resolved for user: {}", api_token.user_id);
                    return Principal::Authenticated {
                        user_id: api_token.user_id,
                        credential: Credential::ApiToken,
                    };
                }
                tracing::debug!("⌛ API token expired for user: {}", api_token.user_id);
            }
        }

        Principal::Anonymous
    }

    /// Runs a store lookup under the configured deadline. Anything but a hit is `None`.
    async fn bounded_lookup<T, F>(&self, what: &'static str, lookup: F) -> Option<T>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.lookup_timeout, lookup).await {
            Ok(Ok(found)) => Some(found),
            Ok(Err(StoreError::NotFound)) => {
                tracing::debug!("🔍 No {} matches the presented credential", what);
                None
            }
            Ok(Err(e)) => {
                tracing::warn!("⚠️ {} lookup failed, treating request as anonymous: {}", what, e);
                None
            }
            Err(_) => {
                tracing::warn!(
                    "⚠️ {} lookup exceeded {:?}, treating request as anonymous",
                    what,
                    self.lookup_timeout
                );
                None
            }
        }
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// A middleware that attaches the [`RequestContext`] to the request.
///
/// Requires the request-id stage to have run first; the `Extension<RequestId>`
/// extractor rejects the request otherwise.
///
/// # Arguments
///
/// * `resolver` - The identity resolver.
/// * `request_id` - The id assigned by the request-id stage.
/// * `cookies` - The request cookies.
/// * `req` - The incoming request.
/// * `next` - The next middleware in the chain.
pub async fn resolve_identity(
    State(resolver): State<IdentityResolver>,
    Extension(request_id): Extension<RequestId>,
    cookies: Cookies,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let session_token = cookies.get(SESSION_COOKIE).map(|c| c.value().to_string());
    let bearer = extract_bearer_token(req.headers()).map(str::to_string);

    let principal = resolver
        .resolve(session_token.as_deref(), bearer.as_deref())
        .await;

    req.extensions_mut().insert(RequestContext {
        request_id,
        principal,
    });

    next.run(req).await
}
