//! Surface-specific rejection responses.
//!
//! Each pipeline picks one responder up front. Guards and stages only decide
//! *that* a request is rejected; the responder decides what the rejection looks
//! like to the caller.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, Uri, header},
    middleware::Next,
    response::{Html, IntoResponse, Response},
};
use std::sync::Arc;

use crate::error::{ErrorReport, json_error};

/// Header htmx sends on partial-update requests.
pub const HX_REQUEST: &str = "hx-request";
/// Header htmx follows to perform a client-side redirect.
pub const HX_REDIRECT: &str = "hx-redirect";
/// Full URL of the page an htmx request was issued from.
pub const HX_CURRENT_URL: &str = "hx-current-url";

/// Builds rejection responses for one call surface.
pub trait Responder: Send + Sync {
    /// The caller has no authenticated principal.
    fn unauthenticated(&self, uri: &Uri, headers: &HeaderMap) -> Response;

    /// The caller is known but not allowed. `code` is the stable reason.
    fn forbidden(&self, code: &'static str, message: &str) -> Response;

    /// The caller exceeded its rate limit.
    fn too_many_requests(&self) -> Response;

    /// A handler failed. `message` is already safe to show the caller.
    fn failure(&self, status: StatusCode, code: &'static str, message: &str) -> Response;
}

/// A responder shared by every stage of a pipeline.
pub type SharedResponder = Arc<dyn Responder>;

/// Responder for browser pages: redirects to the login view.
#[derive(Debug, Clone)]
pub struct HtmlResponder {
    login_path: String,
}

impl HtmlResponder {
    pub fn new(login_path: impl Into<String>) -> Self {
        Self {
            login_path: login_path.into(),
        }
    }

    /// The login URL carrying the originally requested path and query.
    pub fn login_url(&self, uri: &Uri) -> String {
        let return_to = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        self.login_url_to(return_to)
    }

    fn login_url_to(&self, return_to: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(return_to.as_bytes()).collect();
        format!("{}?return_to={}", self.login_path, encoded)
    }
}

/// Path and query of the page behind an htmx request, from `HX-Current-URL`.
fn htmx_current_page(headers: &HeaderMap) -> Option<String> {
    let current = headers.get(HX_CURRENT_URL)?.to_str().ok()?;
    let parsed = url::Url::parse(current).ok()?;
    Some(match parsed.query() {
        Some(query) => format!("{}?{}", parsed.path(), query),
        None => parsed.path().to_string(),
    })
}

fn is_htmx(headers: &HeaderMap) -> bool {
    headers
        .get(HX_REQUEST)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

impl Responder for HtmlResponder {
    fn unauthenticated(&self, uri: &Uri, headers: &HeaderMap) -> Response {
        if is_htmx(headers) {
            let login_url = match htmx_current_page(headers) {
                Some(page) => self.login_url_to(&page),
                None => self.login_url(uri),
            };
            let Ok(location) = HeaderValue::from_str(&login_url) else {
                return StatusCode::UNAUTHORIZED.into_response();
            };
            tracing::debug!("↪️ htmx request without session, signalling client redirect");
            return (StatusCode::UNAUTHORIZED, [(HX_REDIRECT, location)]).into_response();
        }

        let login_url = self.login_url(uri);
        let Ok(location) = HeaderValue::from_str(&login_url) else {
            return StatusCode::UNAUTHORIZED.into_response();
        };

        tracing::debug!("↪️ Redirecting anonymous request to {}", login_url);
        (StatusCode::SEE_OTHER, [(header::LOCATION, location)]).into_response()
    }

    fn forbidden(&self, _code: &'static str, message: &str) -> Response {
        (
            StatusCode::FORBIDDEN,
            Html(format!("<h1>Forbidden</h1><p>{}</p>", escape_html(message))),
        )
            .into_response()
    }

    fn too_many_requests(&self) -> Response {
        (
            StatusCode::TOO_MANY_REQUESTS,
            Html("<h1>Too many requests</h1><p>Please slow down and try again shortly.</p>"),
        )
            .into_response()
    }

    fn failure(&self, status: StatusCode, _code: &'static str, message: &str) -> Response {
        let title = status.canonical_reason().unwrap_or("Error");
        (
            status,
            Html(format!(
                "<h1>{}</h1><p>{}</p><p><a href=\"/\">Back to the home page</a></p>",
                escape_html(title),
                escape_html(message)
            )),
        )
            .into_response()
    }
}

/// Responder for the machine API: structured JSON errors, never redirects.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonResponder;

impl Responder for JsonResponder {
    fn unauthenticated(&self, _uri: &Uri, _headers: &HeaderMap) -> Response {
        json_error(
            StatusCode::UNAUTHORIZED,
            "authentication_required",
            "A valid session or API token is required",
        )
    }

    fn forbidden(&self, code: &'static str, message: &str) -> Response {
        json_error(StatusCode::FORBIDDEN, code, message)
    }

    fn too_many_requests(&self) -> Response {
        json_error(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            "Too many requests",
        )
    }

    fn failure(&self, status: StatusCode, code: &'static str, message: &str) -> Response {
        json_error(status, code, message)
    }
}

/// A middleware that re-renders handler errors through the pipeline's responder.
///
/// Responses without an [`ErrorReport`] pass through untouched.
pub async fn render_errors(
    State(responder): State<SharedResponder>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let response = next.run(req).await;
    match response.extensions().get::<ErrorReport>().cloned() {
        Some(report) => responder.failure(response.status(), report.code, &report.message),
        None => response,
    }
}

/// Minimal escaping for text interpolated into HTML.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use axum::{Router, middleware::from_fn_with_state, routing::get};
    use tower::ServiceExt;

    #[test]
    fn login_url_preserves_path_and_query() {
        let responder = HtmlResponder::new("/login");
        let uri: Uri = "/records?page=2".parse().unwrap();
        assert_eq!(
            responder.login_url(&uri),
            "/login?return_to=%2Frecords%3Fpage%3D2"
        );
    }

    #[test]
    fn htmx_requests_get_a_client_redirect_header() {
        let responder = HtmlResponder::new("/login");
        let mut headers = HeaderMap::new();
        headers.insert(HX_REQUEST, HeaderValue::from_static("true"));

        let response = responder.unauthenticated(&"/account".parse().unwrap(), &headers);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(HX_REDIRECT).unwrap(),
            "/login?return_to=%2Faccount"
        );
        assert!(response.headers().get(header::LOCATION).is_none());
    }

    #[test]
    fn htmx_redirect_returns_to_the_current_page() {
        let responder = HtmlResponder::new("/login");
        let mut headers = HeaderMap::new();
        headers.insert(HX_REQUEST, HeaderValue::from_static("true"));
        headers.insert(
            HX_CURRENT_URL,
            HeaderValue::from_static("https://vault.example.com/records?page=2"),
        );

        let response = responder.unauthenticated(&"/partials/shelf".parse().unwrap(), &headers);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(HX_REDIRECT).unwrap(),
            "/login?return_to=%2Frecords%3Fpage%3D2"
        );
    }

    #[test]
    fn unparseable_current_url_falls_back_to_request_uri() {
        let responder = HtmlResponder::new("/login");
        let mut headers = HeaderMap::new();
        headers.insert(HX_REQUEST, HeaderValue::from_static("true"));
        headers.insert(HX_CURRENT_URL, HeaderValue::from_static("not a url"));

        let response = responder.unauthenticated(&"/partials/shelf".parse().unwrap(), &headers);
        assert_eq!(
            response.headers().get(HX_REDIRECT).unwrap(),
            "/login?return_to=%2Fpartials%2Fshelf"
        );
    }

    fn failing_app(responder: SharedResponder) -> Router {
        Router::new()
            .route(
                "/",
                get(|| async {
                    Err::<&'static str, _>(AppError::Internal("pool closed at 10.0.0.7".to_string()))
                }),
            )
            .layer(from_fn_with_state(responder, render_errors))
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn handler_errors_render_as_html_on_pages() {
        let response = failing_app(Arc::new(HtmlResponder::new("/login")))
            .oneshot(axum::http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("text/html")
        );

        let body = body_text(response).await;
        assert!(body.contains("Internal server error"));
        assert!(body.contains("href=\"/\""));
        assert!(!body.contains("10.0.0.7"));
    }

    #[tokio::test]
    async fn handler_errors_stay_json_on_the_api() {
        let response = failing_app(Arc::new(JsonResponder))
            .oneshot(axum::http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );

        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["code"], "internal");
    }

    #[tokio::test]
    async fn successful_responses_pass_through() {
        let app = Router::new()
            .route("/", get(|| async { "fine" }))
            .layer(from_fn_with_state(
                Arc::new(HtmlResponder::new("/login")) as SharedResponder,
                render_errors,
            ));
        let response = app
            .oneshot(axum::http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "fine");
    }

    #[test]
    fn html_escape_neutralises_markup() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#x27;&amp;&#x27;&lt;/a&gt;"
        );
    }
}
