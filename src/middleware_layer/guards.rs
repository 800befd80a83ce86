//! Route guards. Each reads the resolved principal and either passes the request
//! on untouched or short-circuits with the pipeline's responder.

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::{
    middleware_layer::{
        auth::RequestContext,
        responder::{JsonResponder, Responder, SharedResponder},
    },
    repositories::store::{Store, StoreError},
};

/// A middleware that lets only authenticated principals through.
///
/// Anonymous requests get whatever the pipeline's responder produces: a login
/// redirect for pages, a structured 401 for the API.
pub async fn require_authenticated(
    State(responder): State<SharedResponder>,
    ctx: RequestContext,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !ctx.principal().is_authenticated() {
        tracing::debug!("🔒 Anonymous request to {} rejected", req.uri().path());
        return responder.unauthenticated(req.uri(), req.headers());
    }
    next.run(req).await
}

/// Like [`require_authenticated`], but always answers with a JSON 401 and never redirects.
pub async fn require_api_authenticated(
    ctx: RequestContext,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !ctx.principal().is_authenticated() {
        tracing::debug!("🔒 Anonymous API request to {} rejected", req.uri().path());
        return JsonResponder.unauthenticated(req.uri(), req.headers());
    }
    next.run(req).await
}

/// The role looked up for this request's principal, kept so stacked role guards
/// on one route share a single lookup. Lives only as long as the request.
#[derive(Debug, Clone)]
struct ResolvedRole {
    user_id: Uuid,
    role: String,
}

/// Requires an exact role match for the authenticated principal.
///
/// This does a store round trip on every request it guards. Roles are not cached
/// across requests because a role change must take effect on the next request.
#[derive(Clone)]
pub struct RoleGuard {
    role: Arc<str>,
    store: Arc<dyn Store>,
    responder: SharedResponder,
    lookup_timeout: Duration,
}

impl RoleGuard {
    pub fn new(
        role: &str,
        store: Arc<dyn Store>,
        responder: SharedResponder,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            role: Arc::from(role),
            store,
            responder,
            lookup_timeout,
        }
    }

    async fn lookup_role(&self, user_id: Uuid) -> Option<String> {
        match tokio::time::timeout(self.lookup_timeout, self.store.find_user_role(user_id)).await {
            Ok(Ok(role)) => Some(role),
            Ok(Err(StoreError::NotFound)) => {
                tracing::warn!("⚠️ Role lookup found no user {}", user_id);
                None
            }
            Ok(Err(e)) => {
                tracing::warn!("⚠️ Role lookup failed for user {}: {}", user_id, e);
                None
            }
            Err(_) => {
                tracing::warn!(
                    "⚠️ Role lookup for user {} exceeded {:?}",
                    user_id,
                    self.lookup_timeout
                );
                None
            }
        }
    }
}

/// A middleware enforcing a [`RoleGuard`].
///
/// # Returns
///
/// The downstream `Response`; the responder's unauthenticated response for an
/// anonymous principal; 403 on a role mismatch, lookup failure or timeout.
pub async fn require_role(
    State(guard): State<RoleGuard>,
    ctx: RequestContext,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(user_id) = ctx.principal().user_id() else {
        return guard.responder.unauthenticated(req.uri(), req.headers());
    };

    let cached = req
        .extensions()
        .get::<ResolvedRole>()
        .filter(|resolved| resolved.user_id == user_id)
        .map(|resolved| resolved.role.clone());

    let role = match cached {
        Some(role) => Some(role),
        None => {
            let looked_up = guard.lookup_role(user_id).await;
            if let Some(role) = &looked_up {
                req.extensions_mut().insert(ResolvedRole {
                    user_id,
                    role: role.clone(),
                });
            }
            looked_up
        }
    };

    match role {
        Some(role) if role == *guard.role => next.run(req).await,
        Some(role) => {
            tracing::warn!(
                "🚫 User {} with role '{}' denied; '{}' required",
                user_id,
                role,
                guard.role
            );
            guard
                .responder
                .forbidden("forbidden", "You do not have permission to access this resource")
        }
        None => guard
            .responder
            .forbidden("forbidden", "You do not have permission to access this resource"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware_layer::responder::HtmlResponder;
    use crate::models::principal::{Credential, Principal};
    use crate::repositories::memory::MemoryStore;
    use axum::{
        Extension, Router,
        http::{StatusCode, header},
        middleware::{from_fn, from_fn_with_state},
        routing::get,
    };
    use tower::ServiceExt;

    fn authenticated(user_id: Uuid) -> RequestContext {
        RequestContext::for_tests(Principal::Authenticated {
            user_id,
            credential: Credential::Session,
        })
    }

    fn get_request(uri: &str) -> Request<Body> {
        axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn html() -> SharedResponder {
        Arc::new(HtmlResponder::new("/login"))
    }

    fn authed_app(ctx: RequestContext) -> Router {
        Router::new()
            .route("/account", get(|| async { "account" }))
            .route_layer(from_fn_with_state(html(), require_authenticated))
            .layer(Extension(ctx))
    }

    #[tokio::test]
    async fn anonymous_page_request_redirects_to_login() {
        let response = authed_app(RequestContext::for_tests(Principal::Anonymous))
            .oneshot(get_request("/account?tab=orders"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/login?return_to=%2Faccount%3Ftab%3Dorders"
        );
    }

    #[tokio::test]
    async fn authenticated_page_request_passes() {
        let response = authed_app(authenticated(Uuid::new_v4()))
            .oneshot(get_request("/account"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn anonymous_api_request_gets_json_401() {
        let app = Router::new()
            .route("/api/me", get(|| async { "me" }))
            .route_layer(from_fn(require_api_authenticated))
            .layer(Extension(RequestContext::for_tests(Principal::Anonymous)));

        let response = app.oneshot(get_request("/api/me")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(header::LOCATION).is_none());

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "authentication_required");
    }

    fn role_app(store: Arc<MemoryStore>, ctx: RequestContext, stacked: bool) -> Router {
        let guard = RoleGuard::new(
            "admin",
            store,
            Arc::new(JsonResponder),
            Duration::from_millis(50),
        );
        let mut router = Router::new()
            .route("/admin", get(|| async { "admin" }))
            .route_layer(from_fn_with_state(guard.clone(), require_role));
        if stacked {
            router = router.route_layer(from_fn_with_state(guard, require_role));
        }
        router.layer(Extension(ctx))
    }

    #[tokio::test]
    async fn matching_role_passes_and_mismatch_is_forbidden() {
        let store = Arc::new(MemoryStore::new());
        let admin = store.insert_user("root@example.com", "x", "admin");
        let member = store.insert_user("ada@example.com", "x", "member");

        let response = role_app(store.clone(), authenticated(admin.id), false)
            .oneshot(get_request("/admin"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = role_app(store, authenticated(member.id), false)
            .oneshot(get_request("/admin"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn role_comparison_is_exact() {
        let store = Arc::new(MemoryStore::new());
        let user = store.insert_user("root@example.com", "x", "Admin");

        let response = role_app(store, authenticated(user.id), false)
            .oneshot(get_request("/admin"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn lookup_failure_is_forbidden_not_allowed() {
        let store = Arc::new(MemoryStore::new());
        let admin = store.insert_user("root@example.com", "x", "admin");
        store.set_failing(true);

        let response = role_app(store, authenticated(admin.id), false)
            .oneshot(get_request("/admin"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_lookup_is_forbidden() {
        let store = Arc::new(MemoryStore::new());
        let admin = store.insert_user("root@example.com", "x", "admin");
        store.set_delay(Duration::from_secs(5));

        let response = role_app(store, authenticated(admin.id), false)
            .oneshot(get_request("/admin"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn anonymous_principal_is_unauthenticated_not_forbidden() {
        let store = Arc::new(MemoryStore::new());
        let response = role_app(store.clone(), RequestContext::for_tests(Principal::Anonymous), false)
            .oneshot(get_request("/admin"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(store.role_lookups(), 0);
    }

    #[tokio::test]
    async fn role_is_looked_up_once_per_request_and_again_on_the_next() {
        let store = Arc::new(MemoryStore::new());
        let admin = store.insert_user("root@example.com", "x", "admin");
        let app = role_app(store.clone(), authenticated(admin.id), true);

        let response = app.clone().oneshot(get_request("/admin")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(store.role_lookups(), 1);

        let response = app.oneshot(get_request("/admin")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(store.role_lookups(), 2);
    }
}
