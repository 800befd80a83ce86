use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::LengthLimitError;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tower_cookies::Cookies;

use crate::{config::CsrfConfig, middleware_layer::responder::SharedResponder};

const CSRF_FAILED: &str = "csrf_failed";

/// Double-submit CSRF check for one pipeline.
///
/// The check does not look at the principal: bearer and session callers alike
/// must present the secret on every unsafe request.
#[derive(Clone)]
pub struct CsrfGuard {
    config: Arc<CsrfConfig>,
    responder: SharedResponder,
}

impl CsrfGuard {
    pub fn new(config: CsrfConfig, responder: SharedResponder) -> Self {
        Self {
            config: Arc::new(config),
            responder,
        }
    }

    fn reject(&self, reason: &str) -> Response {
        tracing::warn!("❌ CSRF: {}", reason);
        self.responder
            .forbidden(CSRF_FAILED, "Missing or invalid CSRF token")
    }
}

fn is_safe(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

fn is_form(req: &Request<Body>) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("application/x-www-form-urlencoded"))
}

fn form_field(body: &Bytes, field: &str) -> Option<String> {
    url::form_urlencoded::parse(body)
        .find(|(key, _)| key == field)
        .map(|(_, value)| value.into_owned())
}

fn is_length_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

fn prefix(secret: &str) -> String {
    secret.chars().take(6).collect()
}

/// Compares the two secrets without an early exit on the first differing byte.
fn secrets_match(expected: &str, supplied: &str) -> bool {
    expected.as_bytes().ct_eq(supplied.as_bytes()).into()
}

/// A middleware that verifies the CSRF secret on unsafe methods.
///
/// The secret in the configured cookie must equal the one in the configured
/// header or, when the header is absent on a urlencoded form post, the form
/// field. Form bodies are buffered (already bounded by the body-limit stage)
/// and handed on intact.
///
/// # Arguments
///
/// * `guard` - The CSRF guard for this pipeline.
/// * `cookies` - The request cookies.
/// * `req` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// The downstream `Response`, or 403 with code `csrf_failed`.
pub async fn verify_csrf(
    State(guard): State<CsrfGuard>,
    cookies: Cookies,
    req: Request<Body>,
    next: Next,
) -> Response {
    if is_safe(req.method()) {
        tracing::debug!("✅ CSRF exemption: {} request", req.method());
        return next.run(req).await;
    }

    let expected = match cookies.get(&guard.config.cookie_name) {
        Some(c) if !c.value().is_empty() => c.value().to_string(),
        _ => return guard.reject("cookie not found"),
    };

    let from_header = req
        .headers()
        .get(guard.config.header_name.as_str())
        .map(|value| value.to_str().map(str::to_string));

    let (req, supplied) = match from_header {
        Some(Ok(value)) => (req, Some(value)),
        Some(Err(_)) => return guard.reject("header is not valid text"),
        None if is_form(&req) => {
            let (parts, body) = req.into_parts();
            let bytes = match axum::body::to_bytes(body, usize::MAX).await {
                Ok(bytes) => bytes,
                Err(e) if is_length_limit(&e) => {
                    return StatusCode::PAYLOAD_TOO_LARGE.into_response();
                }
                Err(e) => {
                    tracing::warn!("❌ CSRF: failed to read form body: {}", e);
                    return StatusCode::BAD_REQUEST.into_response();
                }
            };
            let value = form_field(&bytes, &guard.config.form_field);
            (Request::from_parts(parts, Body::from(bytes)), value)
        }
        None => (req, None),
    };

    let Some(supplied) = supplied.filter(|s| !s.is_empty()) else {
        return guard.reject("no token supplied in header or form");
    };

    tracing::debug!(
        "🔍 CSRF validation - Cookie: {}..., Supplied: {}...",
        prefix(&expected),
        prefix(&supplied)
    );

    if !secrets_match(&expected, &supplied) {
        return guard.reject("tokens do not match");
    }

    next.run(req).await
}
