use axum::{
    Form,
    extract::{FromRequestParts, State},
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Redirect, Response},
};
use std::convert::Infallible;
use tower_cookies::cookie::time::Duration;
use tower_cookies::{Cookie, Cookies, cookie::SameSite};

use crate::{
    crypto::token::generate_token,
    error::{AppError, Result},
    handlers::pages,
    middleware_layer::{auth::SESSION_COOKIE, rate_limit::client_address},
    repositories::store::StoreError,
    services::auth::{self as auth_service, ClientMeta},
    state::{AppState, LOGIN_PATH},
    validation::auth::{
        LoginForm, SignupForm, normalize_email, safe_return_to, validate_form,
    },
};

/// Longest user agent stored on a session row.
const MAX_USER_AGENT_CHARS: usize = 512;

impl<S> FromRequestParts<S> for ClientMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let ip_address = Some(client_address(&parts.headers, &parts.extensions))
            .filter(|ip| ip != "unknown");
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|ua| ua.chars().take(MAX_USER_AGENT_CHARS).collect());

        Ok(ClientMeta {
            ip_address,
            user_agent,
        })
    }
}

/// Creates a cookie with the attributes every cookie of this app shares.
///
/// `http_only` is off only for the CSRF cookie, which page scripts must read.
fn create_secure_cookie(
    name: &str,
    value: String,
    max_age_secs: i64,
    http_only: bool,
    secure: bool,
) -> Cookie<'static> {
    let mut cookie = Cookie::new(name.to_string(), value);
    cookie.set_http_only(http_only);
    cookie.set_secure(secure);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_max_age(Duration::seconds(max_age_secs));
    cookie.set_path("/");
    cookie
}

/// Returns the CSRF secret for this browser, minting and setting one if absent.
pub fn ensure_csrf_cookie(state: &AppState, cookies: &Cookies) -> Result<String> {
    let name = state.config.csrf.cookie_name.as_str();
    if let Some(existing) = cookies.get(name).filter(|c| !c.value().is_empty()) {
        return Ok(existing.value().to_string());
    }

    let token = generate_token()?;
    cookies.add(create_secure_cookie(
        name,
        token.clone(),
        state.config.session_max_age_secs(),
        false,
        state.config.cookie_secure,
    ));
    tracing::debug!("🔐 CSRF cookie issued");
    Ok(token)
}

fn set_session_cookie(state: &AppState, cookies: &Cookies, token: String) {
    cookies.add(create_secure_cookie(
        SESSION_COOKIE,
        token,
        state.config.session_max_age_secs(),
        true,
        state.config.cookie_secure,
    ));
}

/// Handles the login form.
pub async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    client: ClientMeta,
    Form(form): Form<LoginForm>,
) -> Result<Response> {
    tracing::info!("🔐 Login attempt - Form: {:?}", form);
    let return_to = safe_return_to(form.return_to.as_deref());

    let authenticated = match validate_form(&form) {
        Ok(()) => {
            auth_service::authenticate_user(&state, &normalize_email(&form.email), form.password)
                .await
        }
        Err(e) => Err(e),
    };

    let user = match authenticated {
        Ok(user) => user,
        Err(AppError::Authentication(_) | AppError::Validation(_)) => {
            let csrf = ensure_csrf_cookie(&state, &cookies)?;
            return Ok(pages::login_view(
                StatusCode::UNAUTHORIZED,
                &csrf,
                &state.config.csrf.form_field,
                &return_to,
                Some("Invalid email or password"),
            ));
        }
        Err(e) => return Err(e),
    };

    let session = auth_service::issue_session(&state, user.id, client).await?;
    set_session_cookie(&state, &cookies, session.token);

    tracing::info!("✅ User logged in: {}", user.id);
    Ok(Redirect::to(&return_to).into_response())
}

/// Handles the signup form.
pub async fn signup(
    State(state): State<AppState>,
    cookies: Cookies,
    client: ClientMeta,
    Form(form): Form<SignupForm>,
) -> Result<Response> {
    tracing::info!("📝 Signup attempt - Form: {:?}", form);

    let registered = match validate_form(&form) {
        Ok(()) => {
            auth_service::register_user(
                &state,
                form.name,
                normalize_email(&form.email),
                form.password,
            )
            .await
        }
        Err(e) => Err(e),
    };

    let (status, message) = match registered {
        Ok(user) => {
            let session = auth_service::issue_session(&state, user.id, client).await?;
            set_session_cookie(&state, &cookies, session.token);
            return Ok(Redirect::to("/").into_response());
        }
        Err(AppError::Validation(msg)) => (StatusCode::BAD_REQUEST, msg),
        Err(AppError::Store(StoreError::Conflict)) => (
            StatusCode::CONFLICT,
            "An account with this email already exists".to_string(),
        ),
        Err(e) => return Err(e),
    };

    let csrf = ensure_csrf_cookie(&state, &cookies)?;
    Ok(pages::signup_view(
        status,
        &csrf,
        &state.config.csrf.form_field,
        Some(&message),
    ))
}

/// Handles logout: the session row is deleted and the cookie cleared.
pub async fn logout(State(state): State<AppState>, cookies: Cookies) -> Result<Response> {
    if let Some(token) = cookies.get(SESSION_COOKIE).map(|c| c.value().to_string()) {
        auth_service::revoke_session(&state, &token).await?;
        tracing::info!("✅ Session revoked");
    }

    cookies.add(create_secure_cookie(
        SESSION_COOKIE,
        String::new(),
        -1,
        true,
        state.config.cookie_secure,
    ));

    Ok(Redirect::to(LOGIN_PATH).into_response())
}
