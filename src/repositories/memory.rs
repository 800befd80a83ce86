//! In-memory `Store` used by the unit tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use crate::{
    models::{
        api_token::ApiToken,
        session::{NewSession, Session},
        user::{NewUser, User},
    },
    repositories::store::{Store, StoreError},
};

#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, Session>>,
    api_tokens: Mutex<HashMap<String, ApiToken>>,
    users: Mutex<HashMap<Uuid, User>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
    role_lookups: AtomicUsize,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, email: &str, password_hash: &str, role: &str) -> User {
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            name: "Test User".to_string(),
            password_hash: password_hash.to_string(),
            role: role.to_string(),
            created_at: Utc::now(),
        };
        locked(&self.users).insert(user.id, user.clone());
        user
    }

    pub fn insert_session(&self, user_id: Uuid, token: &str, expires_at: chrono::DateTime<Utc>) {
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            token: token.to_string(),
            ip_address: None,
            user_agent: None,
            expires_at,
            created_at: Utc::now(),
        };
        locked(&self.sessions).insert(token.to_string(), session);
    }

    pub fn insert_api_token(&self, user_id: Uuid, token: &str, expires_at: chrono::DateTime<Utc>) {
        let api_token = ApiToken {
            id: Uuid::new_v4(),
            user_id,
            token: token.to_string(),
            expires_at,
        };
        locked(&self.api_tokens).insert(token.to_string(), api_token);
    }

    pub fn session(&self, token: &str) -> Option<Session> {
        locked(&self.sessions).get(token).cloned()
    }

    pub fn session_count(&self) -> usize {
        locked(&self.sessions).len()
    }

    pub fn role_lookups(&self) -> usize {
        self.role_lookups.load(Ordering::SeqCst)
    }

    /// Makes every subsequent call fail as if the database were unreachable.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Makes every subsequent call wait before answering.
    pub fn set_delay(&self, delay: Duration) {
        *locked(&self.delay) = Some(delay);
    }

    async fn simulate(&self) -> Result<(), StoreError> {
        let delay = *locked(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Pool(deadpool_postgres::PoolError::Closed));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_session(&self, new_session: NewSession) -> Result<Session, StoreError> {
        self.simulate().await?;
        let session = Session {
            id: Uuid::new_v4(),
            user_id: new_session.user_id,
            token: new_session.token.clone(),
            ip_address: new_session.ip_address,
            user_agent: new_session.user_agent,
            expires_at: new_session.expires_at,
            created_at: Utc::now(),
        };
        locked(&self.sessions).insert(new_session.token, session.clone());
        Ok(session)
    }

    async fn find_session_by_token(&self, token: &str) -> Result<Session, StoreError> {
        self.simulate().await?;
        locked(&self.sessions)
            .get(token)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn delete_session(&self, token: &str) -> Result<(), StoreError> {
        self.simulate().await?;
        locked(&self.sessions).remove(token);
        Ok(())
    }

    async fn find_api_token_by_token(&self, token: &str) -> Result<ApiToken, StoreError> {
        self.simulate().await?;
        locked(&self.api_tokens)
            .get(token)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn find_user_role(&self, user_id: Uuid) -> Result<String, StoreError> {
        self.role_lookups.fetch_add(1, Ordering::SeqCst);
        self.simulate().await?;
        locked(&self.users)
            .get(&user_id)
            .map(|user| user.role.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<User, StoreError> {
        self.simulate().await?;
        locked(&self.users)
            .values()
            .find(|user| user.email == email)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        self.simulate().await?;
        let mut users = locked(&self.users);
        if users.values().any(|user| user.email == new_user.email) {
            return Err(StoreError::Conflict);
        }
        let user = User {
            id: Uuid::new_v4(),
            email: new_user.email,
            name: new_user.name,
            password_hash: new_user.password_hash,
            role: new_user.role,
            created_at: Utc::now(),
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }
}
