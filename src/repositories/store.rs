use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    api_token::ApiToken,
    session::{NewSession, Session},
    user::{NewUser, User},
};

/// Errors surfaced by the persistence layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The lookup matched no row.
    #[error("Record not found")]
    NotFound,

    /// A uniqueness constraint rejected the write.
    #[error("Record already exists")]
    Conflict,

    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// No connection could be checked out of the pool.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A row was missing an expected column.
    #[error("Missing data: {0}")]
    MissingData(String),
}

/// The persistence operations the request pipeline and auth handlers rely on.
///
/// Implementations must be safe to call from many request tasks at once. Lookups
/// report a miss as `StoreError::NotFound`, never as `Ok` with an empty value.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_session(&self, new_session: NewSession) -> Result<Session, StoreError>;

    async fn find_session_by_token(&self, token: &str) -> Result<Session, StoreError>;

    /// Deletes the session holding `token`. Deleting an unknown token succeeds.
    async fn delete_session(&self, token: &str) -> Result<(), StoreError>;

    async fn find_api_token_by_token(&self, token: &str) -> Result<ApiToken, StoreError>;

    async fn find_user_role(&self, user_id: Uuid) -> Result<String, StoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<User, StoreError>;

    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError>;
}
