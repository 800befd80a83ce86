use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A server-side login session, addressed by the opaque token in the session cookie.
///
/// Sessions are never mutated in place: they are created at login/signup, deleted
/// at logout, and otherwise simply stop being valid once `expires_at` passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// The unique identifier for the session row.
    pub id: Uuid,
    /// The ID of the user this session belongs to.
    pub user_id: Uuid,
    /// The opaque secret carried by the cookie. Compared by exact match.
    #[serde(skip_serializing)]
    pub token: String,
    /// The client address seen when the session was issued.
    pub ip_address: Option<String>,
    /// The client user agent seen when the session was issued.
    pub user_agent: Option<String>,
    /// The timestamp when the session expires.
    pub expires_at: DateTime<Utc>,
    /// The timestamp when the session was created.
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// A session is usable only while `now` is strictly before its expiry.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// The fields needed to persist a new session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: Uuid,
    pub token: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
}
