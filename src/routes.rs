//! Router assembly.
//!
//! Every request passes through one pipeline, outermost first:
//! request id → trace/log → error rendering → identity → rate limit →
//! body limit → CSRF → route guards → handler. The browser and API pipelines share the stage code
//! and differ only in the state each stage is given.

use axum::{
    Router,
    body::Body,
    extract::{DefaultBodyLimit, Request},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_cookies::CookieManagerLayer;
use tower_http::{body::Limited, limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::{
    handlers::{api, auth, pages},
    middleware_layer::{
        auth::resolve_identity,
        csrf::verify_csrf,
        guards::{require_api_authenticated, require_authenticated, require_role},
        rate_limit::rate_limit,
        responder::render_errors,
        trace::{CountBody, LogEos, LogResponse, assign_request_id, make_span},
    },
    state::{AppState, Pipeline},
};

/// Wraps `router` in the shared stage stack configured by `pipeline`.
fn with_pipeline(router: Router<AppState>, state: &AppState, pipeline: &Pipeline) -> Router<AppState> {
    router.layer(
        ServiceBuilder::new()
            .layer(from_fn_with_state(pipeline.trace, assign_request_id))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(make_span)
                    .on_response(LogResponse)
                    .on_body_chunk(CountBody::default())
                    .on_eos(LogEos),
            )
            .layer(from_fn_with_state(pipeline.responder.clone(), render_errors))
            .layer(from_fn_with_state(state.identity.clone(), resolve_identity))
            .layer(from_fn_with_state(pipeline.rate_limit.clone(), rate_limit))
            .layer(RequestBodyLimitLayer::new(pipeline.max_body_bytes))
            .map_request(|req: Request<Limited<Body>>| req.map(Body::new))
            .layer(DefaultBodyLimit::max(pipeline.max_body_bytes))
            .layer(from_fn_with_state(pipeline.csrf.clone(), verify_csrf)),
    )
}

fn web_routes(state: &AppState) -> Router<AppState> {
    let responder = state.web.responder.clone();

    let public = Router::new()
        .route("/", get(pages::home))
        .route("/login", get(pages::login_page).post(auth::login))
        .route("/signup", get(pages::signup_page).post(auth::signup))
        .route("/logout", post(auth::logout));

    let members = Router::new()
        .route("/account", get(pages::account))
        .route_layer(from_fn_with_state(responder.clone(), require_authenticated));

    // route_layer wraps what is already there, so the last one added runs first.
    let admins = Router::new()
        .route("/admin", get(pages::admin))
        .route_layer(from_fn_with_state(
            state.role_guard("admin", responder.clone()),
            require_role,
        ))
        .route_layer(from_fn_with_state(responder, require_authenticated));

    with_pipeline(public.merge(members).merge(admins), state, &state.web)
}

fn api_routes(state: &AppState) -> Router<AppState> {
    let me = Router::new()
        .route("/api/me", get(api::me))
        .route_layer(from_fn(require_api_authenticated));

    let admin = Router::new()
        .route("/api/admin/ping", get(api::admin_ping))
        .route_layer(from_fn_with_state(
            state.role_guard("admin", state.api.responder.clone()),
            require_role,
        ))
        .route_layer(from_fn(require_api_authenticated));

    with_pipeline(me.merge(admin), state, &state.api)
}

/// Builds the application router.
pub fn build_router(state: &AppState) -> Router {
    Router::new()
        .merge(web_routes(state))
        .merge(api_routes(state))
        .layer(CookieManagerLayer::new())
        .with_state(state.clone())
}
