use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    middleware_layer::auth::RequestContext,
    models::principal::Credential,
};

/// The response payload for `/api/me`.
#[derive(Serialize)]
pub struct MeResponse<'a> {
    pub user_id: Option<Uuid>,
    pub credential: Option<Credential>,
    pub request_id: &'a str,
}

#[derive(Serialize)]
pub struct PingResponse<'a> {
    pub status: &'static str,
    pub request_id: &'a str,
}

fn json_ok<T: Serialize>(value: &T) -> Result<Response> {
    let body = sonic_rs::to_string(value)
        .map_err(|e| AppError::Internal(format!("Response serialization failed: {}", e)))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response())
}

/// Returns the caller's identity as seen by the pipeline.
pub async fn me(ctx: RequestContext) -> Result<Response> {
    let principal = ctx.principal();
    json_ok(&MeResponse {
        user_id: principal.user_id(),
        credential: principal.credential(),
        request_id: ctx.request_id().as_str(),
    })
}

/// Liveness check for admin tooling.
pub async fn admin_ping(ctx: RequestContext) -> Result<Response> {
    json_ok(&PingResponse {
        status: "ok",
        request_id: ctx.request_id().as_str(),
    })
}
