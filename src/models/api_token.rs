use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A bearer credential for machine clients.
///
/// Issued out of band; this service only ever reads them.
#[derive(Debug, Clone)]
pub struct ApiToken {
    /// The unique identifier for the token row.
    pub id: Uuid,
    /// The ID of the user the token acts as.
    pub user_id: Uuid,
    /// The opaque secret sent as `Authorization: Bearer <token>`.
    pub token: String,
    /// The timestamp when the token expires.
    pub expires_at: DateTime<Utc>,
}

impl ApiToken {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}
