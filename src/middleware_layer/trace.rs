//! Request identity for tracing: every request gets an id before anything else runs.

use axum::{
    body::{Body, Bytes, HttpBody},
    extract::{MatchedPath, Request, State},
    http::{HeaderMap, HeaderValue, Response},
    middleware::Next,
};
use std::time::Duration;
use tower_http::trace::{OnBodyChunk, OnEos, OnResponse};
use tracing::{Span, info_span};

use crate::crypto::token::{generate_request_id, is_acceptable_request_id};
use crate::models::principal::RequestId;

/// Header carrying the request id in both directions.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// State for the request-id stage.
#[derive(Debug, Clone, Copy)]
pub struct RequestTrace {
    /// Adopt a well-formed inbound `x-request-id` instead of minting one.
    pub trust_inbound: bool,
}

impl RequestTrace {
    fn pick(&self, req: &Request<Body>) -> String {
        if self.trust_inbound {
            let inbound = req
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|value| value.to_str().ok())
                .filter(|value| is_acceptable_request_id(value));
            if let Some(id) = inbound {
                return id.to_string();
            }
        }
        generate_request_id()
    }
}

/// A middleware that assigns the request id.
///
/// The id is stored as a typed [`RequestId`] extension for later stages,
/// written to the request's `x-request-id` header for the trace span, and echoed
/// on the response. Untrusted inbound ids are overwritten, never forwarded.
pub async fn assign_request_id(
    State(trace): State<RequestTrace>,
    mut req: Request<Body>,
    next: Next,
) -> Response<Body> {
    let id = trace.pick(&req);

    // Generated ids are uuids or hex timestamps, and adopted ids were screened to
    // visible ASCII, so the header conversion only fails on a broken invariant.
    let header = HeaderValue::from_str(&id).ok();
    if let Some(value) = &header {
        req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
    } else {
        req.headers_mut().remove(REQUEST_ID_HEADER);
    }
    req.extensions_mut().insert(RequestId::new(id));

    let mut response = next.run(req).await;
    if let Some(value) = header {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Opens the per-request span, tagged with method, route and request id.
pub fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id,
        http.response.bytes = tracing::field::Empty
    )
}

/// Logs one line per request once headers are sent: status, latency and the
/// body size when it is known up front. Streamed bodies are counted by
/// [`CountBody`] instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogResponse;

impl<B> OnResponse<B> for LogResponse
where
    B: HttpBody,
{
    fn on_response(self, response: &Response<B>, latency: Duration, _span: &Span) {
        let status = response.status().as_u16();
        let latency_ms = latency.as_secs_f64() * 1000.0;
        let size = response.body().size_hint().exact();

        if response.status().is_server_error() {
            tracing::error!(status, latency_ms, size, "request failed");
        } else {
            tracing::info!(status, latency_ms, size, "request completed");
        }
    }
}

/// Counts response body bytes as they are sent and keeps the running total on
/// the request span's `http.response.bytes` field.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountBody {
    bytes: u64,
}

impl CountBody {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl OnBodyChunk<Bytes> for CountBody {
    fn on_body_chunk(&mut self, chunk: &Bytes, _latency: Duration, span: &Span) {
        self.bytes += chunk.len() as u64;
        span.record("http.response.bytes", self.bytes);
    }
}

/// Logs the end of the response body. The byte total rides on the span.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEos;

impl OnEos for LogEos {
    fn on_eos(self, _trailers: Option<&HeaderMap>, stream_duration: Duration, _span: &Span) {
        let stream_ms = stream_duration.as_secs_f64() * 1000.0;
        tracing::debug!(stream_ms, "response body sent");
    }
}
