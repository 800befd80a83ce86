//! Server-rendered views. Plain HTML strings that drive the
//! request pipeline from a browser.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use serde::Deserialize;
use tower_cookies::Cookies;

use crate::{
    error::Result,
    handlers::auth::ensure_csrf_cookie,
    middleware_layer::{auth::RequestContext, responder::escape_html},
    state::AppState,
    validation::auth::safe_return_to,
};

#[derive(Deserialize)]
pub struct LoginQuery {
    #[serde(default)]
    pub return_to: Option<String>,
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>{} · Vinyl Vault</title></head><body>{}</body></html>",
        escape_html(title),
        body
    )
}

fn hidden(name: &str, value: &str) -> String {
    format!(
        "<input type=\"hidden\" name=\"{}\" value=\"{}\">",
        escape_html(name),
        escape_html(value)
    )
}

fn error_banner(message: Option<&str>) -> String {
    message
        .map(|m| format!("<p class=\"error\">{}</p>", escape_html(m)))
        .unwrap_or_default()
}

fn logout_form(csrf: &str, csrf_field: &str) -> String {
    format!(
        "<form method=\"post\" action=\"/logout\">{}<button>Sign out</button></form>",
        hidden(csrf_field, csrf)
    )
}

/// Renders the login form.
pub fn login_view(
    status: StatusCode,
    csrf: &str,
    csrf_field: &str,
    return_to: &str,
    error: Option<&str>,
) -> Response {
    let body = format!(
        "<h1>Sign in</h1>{}<form method=\"post\" action=\"/login\">{}{}\
         <label>Email <input type=\"email\" name=\"email\" required></label>\
         <label>Password <input type=\"password\" name=\"password\" required></label>\
         <button>Sign in</button></form><p><a href=\"/signup\">Create an account</a></p>",
        error_banner(error),
        hidden(csrf_field, csrf),
        hidden("return_to", return_to),
    );
    (status, Html(layout("Sign in", &body))).into_response()
}

/// Renders the signup form.
pub fn signup_view(status: StatusCode, csrf: &str, csrf_field: &str, error: Option<&str>) -> Response {
    let body = format!(
        "<h1>Create an account</h1>{}<form method=\"post\" action=\"/signup\">{}\
         <label>Name <input name=\"name\" required></label>\
         <label>Email <input type=\"email\" name=\"email\" required></label>\
         <label>Password <input type=\"password\" name=\"password\" minlength=\"8\" required></label>\
         <button>Sign up</button></form>",
        error_banner(error),
        hidden(csrf_field, csrf),
    );
    (status, Html(layout("Sign up", &body))).into_response()
}

/// Public landing page.
pub async fn home(
    State(state): State<AppState>,
    ctx: RequestContext,
    cookies: Cookies,
) -> Result<Response> {
    let body = match ctx.principal().user_id() {
        Some(user_id) => {
            let csrf = ensure_csrf_cookie(&state, &cookies)?;
            format!(
                "<h1>Vinyl Vault</h1><p>Signed in as {}.</p><p><a href=\"/account\">Your collection</a></p>{}",
                user_id,
                logout_form(&csrf, &state.config.csrf.form_field)
            )
        }
        None => "<h1>Vinyl Vault</h1><p><a href=\"/login\">Sign in</a> or <a href=\"/signup\">create an account</a>.</p>"
            .to_string(),
    };
    Ok(Html(layout("Home", &body)).into_response())
}

/// The login view. Echoes a safe `return_to` back into the form.
pub async fn login_page(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<LoginQuery>,
) -> Result<Response> {
    let csrf = ensure_csrf_cookie(&state, &cookies)?;
    let return_to = safe_return_to(query.return_to.as_deref());
    Ok(login_view(
        StatusCode::OK,
        &csrf,
        &state.config.csrf.form_field,
        &return_to,
        None,
    ))
}

pub async fn signup_page(State(state): State<AppState>, cookies: Cookies) -> Result<Response> {
    let csrf = ensure_csrf_cookie(&state, &cookies)?;
    Ok(signup_view(StatusCode::OK, &csrf, &state.config.csrf.form_field, None))
}

/// Account page. Only reachable through the authentication guard.
pub async fn account(
    State(state): State<AppState>,
    ctx: RequestContext,
    cookies: Cookies,
) -> Result<Response> {
    let csrf = ensure_csrf_cookie(&state, &cookies)?;
    let user = ctx
        .principal()
        .user_id()
        .map(|id| id.to_string())
        .unwrap_or_default();
    let body = format!(
        "<h1>Your collection</h1><p>User {}</p><p>Request {}</p>{}",
        escape_html(&user),
        escape_html(ctx.request_id().as_str()),
        logout_form(&csrf, &state.config.csrf.form_field)
    );
    Ok(Html(layout("Account", &body)).into_response())
}

/// Admin page. Only reachable through the authentication and `admin` role guards.
pub async fn admin(ctx: RequestContext) -> Html<String> {
    let body = format!(
        "<h1>Admin</h1><p>Request {}</p>",
        escape_html(ctx.request_id().as_str())
    );
    Html(layout("Admin", &body))
}
