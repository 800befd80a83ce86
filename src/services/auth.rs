use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::token::generate_token;
use crate::error::{AppError, Result};
use crate::models::session::{NewSession, Session};
use crate::models::user::{DEFAULT_ROLE, NewUser, User};
use crate::repositories::store::StoreError;
use crate::state::AppState;

const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// Where a login came from, recorded on the session row.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Authenticates a user by email and password.
///
/// Unknown emails and wrong passwords produce the same error.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `email` - The normalised email address.
/// * `password` - The plaintext password.
///
/// # Returns
///
/// A `Result` containing the authenticated `User`.
pub async fn authenticate_user(state: &AppState, email: &str, password: String) -> Result<User> {
    let password = Zeroizing::new(password);

    let user = match state.store.find_user_by_email(email).await {
        Ok(user) => user,
        Err(StoreError::NotFound) => {
            tracing::debug!("🔐 Login attempt for unknown email");
            return Err(AppError::Authentication(INVALID_CREDENTIALS.to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let hasher = state.hasher.clone();
    let digest = user.password_hash.clone();
    let valid = tokio::task::spawn_blocking(move || hasher.verify(&digest, &password))
        .await
        .map_err(|e| AppError::Internal(format!("Password verification task failed: {}", e)))?;

    if !valid {
        tracing::debug!("🔐 Wrong password for user: {}", user.id);
        return Err(AppError::Authentication(INVALID_CREDENTIALS.to_string()));
    }

    Ok(user)
}

/// Creates a new member account.
pub async fn register_user(
    state: &AppState,
    name: String,
    email: String,
    password: String,
) -> Result<User> {
    let password = Zeroizing::new(password);
    let hasher = state.hasher.clone();
    let password_hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .map_err(|e| AppError::Internal(format!("Password hashing task failed: {}", e)))??;

    let user = state
        .store
        .create_user(NewUser {
            email,
            name: name.trim().to_string(),
            password_hash,
            role: DEFAULT_ROLE.to_string(),
        })
        .await?;

    tracing::info!("✅ User created with ID: {}", user.id);
    Ok(user)
}

/// Issues a fresh session for `user_id`.
///
/// Fails outright if the OS random source cannot produce a token.
pub async fn issue_session(state: &AppState, user_id: Uuid, client: ClientMeta) -> Result<Session> {
    let token = generate_token()?;
    let expires_at = state.clock.now() + state.config.session_duration();

    let session = state
        .store
        .create_session(NewSession {
            user_id,
            token,
            ip_address: client.ip_address,
            user_agent: client.user_agent,
            expires_at,
        })
        .await?;

    tracing::info!("✅ Session issued for user: {}", user_id);
    Ok(session)
}

/// Deletes the session behind `token`. Unknown tokens are not an error.
pub async fn revoke_session(state: &AppState, token: &str) -> Result<()> {
    state.store.delete_session(token).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::crypto::token::TOKEN_LEN;
    use crate::state::test_support::test_state;

    #[tokio::test]
    async fn register_then_authenticate() {
        let (state, _store, _clock) = test_state();
        let user = register_user(
            &state,
            " Ada ".to_string(),
            "ada@example.com".to_string(),
            "correct horse".to_string(),
        )
        .await
        .unwrap();
        assert_eq!(user.role, DEFAULT_ROLE);
        assert_eq!(user.name, "Ada");
        assert_ne!(user.password_hash, "correct horse");

        let authed = authenticate_user(&state, "ada@example.com", "correct horse".to_string())
            .await
            .unwrap();
        assert_eq!(authed.id, user.id);
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_look_the_same() {
        let (state, _store, _clock) = test_state();
        register_user(
            &state,
            "Ada".to_string(),
            "ada@example.com".to_string(),
            "correct horse".to_string(),
        )
        .await
        .unwrap();

        let wrong = authenticate_user(&state, "ada@example.com", "wrong horse".to_string())
            .await
            .unwrap_err();
        let unknown = authenticate_user(&state, "bob@example.com", "correct horse".to_string())
            .await
            .unwrap_err();
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let (state, _store, _clock) = test_state();
        for expect_ok in [true, false] {
            let result = register_user(
                &state,
                "Ada".to_string(),
                "ada@example.com".to_string(),
                "correct horse".to_string(),
            )
            .await;
            assert_eq!(result.is_ok(), expect_ok);
        }
    }

    #[tokio::test]
    async fn issued_session_has_fresh_token_and_fixed_lifetime() {
        let (state, store, clock) = test_state();
        let user_id = Uuid::new_v4();
        let session = issue_session(
            &state,
            user_id,
            ClientMeta {
                ip_address: Some("192.0.2.1".to_string()),
                user_agent: Some("test-agent".to_string()),
            },
        )
        .await
        .unwrap();

        assert_eq!(session.token.len(), TOKEN_LEN);
        assert_eq!(session.expires_at, clock.now() + state.config.session_duration());
        assert_eq!(session.ip_address.as_deref(), Some("192.0.2.1"));
        assert!(store.session(&session.token).is_some());

        revoke_session(&state, &session.token).await.unwrap();
        revoke_session(&state, &session.token).await.unwrap();
        assert_eq!(store.session_count(), 0);
    }
}
