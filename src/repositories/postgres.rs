use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::{error::SqlState, Row};
use uuid::Uuid;

use crate::{
    models::{
        api_token::ApiToken,
        session::{NewSession, Session},
        user::{NewUser, User},
    },
    repositories::store::{Store, StoreError},
};

const INSERT_SESSION: &str = r#"
    INSERT INTO sessions (id, user_id, token, ip_address, user_agent, expires_at)
    VALUES ($1, $2, $3, $4, $5, $6)
    RETURNING id, user_id, token, ip_address, user_agent, expires_at, created_at
"#;

const SELECT_SESSION_BY_TOKEN: &str = r#"
    SELECT id, user_id, token, ip_address, user_agent, expires_at, created_at
    FROM sessions
    WHERE token = $1
"#;

const DELETE_SESSION_BY_TOKEN: &str = "DELETE FROM sessions WHERE token = $1";

const SELECT_API_TOKEN_BY_TOKEN: &str = r#"
    SELECT id, user_id, token, expires_at
    FROM api_tokens
    WHERE token = $1
"#;

const SELECT_USER_ROLE: &str = "SELECT role FROM users WHERE id = $1";

const SELECT_USER_BY_EMAIL: &str = r#"
    SELECT id, email, name, password_hash, role, created_at
    FROM users
    WHERE email = $1
"#;

const INSERT_USER: &str = r#"
    INSERT INTO users (id, email, name, password_hash, role)
    VALUES ($1, $2, $3, $4, $5)
    RETURNING id, email, name, password_hash, role, created_at
"#;

fn column<'a, T>(row: &'a Row, name: &str) -> Result<T, StoreError>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get(name)
        .map_err(|_| StoreError::MissingData(name.to_string()))
}

/// A helper function to map a `tokio_postgres::Row` to a `Session`.
fn row_to_session(row: &Row) -> Result<Session, StoreError> {
    Ok(Session {
        id: column(row, "id")?,
        user_id: column(row, "user_id")?,
        token: column(row, "token")?,
        ip_address: column(row, "ip_address")?,
        user_agent: column(row, "user_agent")?,
        expires_at: column(row, "expires_at")?,
        created_at: column(row, "created_at")?,
    })
}

fn row_to_api_token(row: &Row) -> Result<ApiToken, StoreError> {
    Ok(ApiToken {
        id: column(row, "id")?,
        user_id: column(row, "user_id")?,
        token: column(row, "token")?,
        expires_at: column(row, "expires_at")?,
    })
}

fn row_to_user(row: &Row) -> Result<User, StoreError> {
    Ok(User {
        id: column(row, "id")?,
        email: column(row, "email")?,
        name: column(row, "name")?,
        password_hash: column(row, "password_hash")?,
        role: column(row, "role")?,
        created_at: column(row, "created_at")?,
    })
}

fn map_unique_violation(err: tokio_postgres::Error) -> StoreError {
    if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        StoreError::Conflict
    } else {
        StoreError::Database(err)
    }
}

/// PostgreSQL-backed store.
///
/// Statements are prepared once per pooled connection through deadpool's
/// per-client statement cache.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Creates a new `PgStore` over an existing pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn query_opt(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<Option<Row>, StoreError> {
        let client = self.pool.get().await?;
        let statement = client.prepare_cached(sql).await?;
        Ok(client.query_opt(&statement, params).await?)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_session(&self, new_session: NewSession) -> Result<Session, StoreError> {
        let client = self.pool.get().await?;
        let statement = client.prepare_cached(INSERT_SESSION).await?;
        let row = client
            .query_one(
                &statement,
                &[
                    &Uuid::new_v4(),
                    &new_session.user_id,
                    &new_session.token,
                    &new_session.ip_address,
                    &new_session.user_agent,
                    &new_session.expires_at,
                ],
            )
            .await?;
        row_to_session(&row)
    }

    async fn find_session_by_token(&self, token: &str) -> Result<Session, StoreError> {
        let row = self
            .query_opt(SELECT_SESSION_BY_TOKEN, &[&token])
            .await?
            .ok_or(StoreError::NotFound)?;
        row_to_session(&row)
    }

    async fn delete_session(&self, token: &str) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        let statement = client.prepare_cached(DELETE_SESSION_BY_TOKEN).await?;
        let deleted = client.execute(&statement, &[&token]).await?;
        tracing::debug!("🗑️ Deleted {} session row(s)", deleted);
        Ok(())
    }

    async fn find_api_token_by_token(&self, token: &str) -> Result<ApiToken, StoreError> {
        let row = self
            .query_opt(SELECT_API_TOKEN_BY_TOKEN, &[&token])
            .await?
            .ok_or(StoreError::NotFound)?;
        row_to_api_token(&row)
    }

    async fn find_user_role(&self, user_id: Uuid) -> Result<String, StoreError> {
        let row = self
            .query_opt(SELECT_USER_ROLE, &[&user_id])
            .await?
            .ok_or(StoreError::NotFound)?;
        column(&row, "role")
    }

    async fn find_user_by_email(&self, email: &str) -> Result<User, StoreError> {
        let row = self
            .query_opt(SELECT_USER_BY_EMAIL, &[&email])
            .await?
            .ok_or(StoreError::NotFound)?;
        row_to_user(&row)
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        let client = self.pool.get().await?;
        let statement = client.prepare_cached(INSERT_USER).await?;
        let row = client
            .query_one(
                &statement,
                &[
                    &Uuid::new_v4(),
                    &new_user.email,
                    &new_user.name,
                    &new_user.password_hash,
                    &new_user.role,
                ],
            )
            .await
            .map_err(map_unique_violation)?;
        row_to_user(&row)
    }
}
