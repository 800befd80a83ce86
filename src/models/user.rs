use chrono::{DateTime, Utc};
use uuid::Uuid;

/// The role given to accounts created through signup.
pub const DEFAULT_ROLE: &str = "member";

/// Represents a user in the system.
#[derive(Clone, Debug)]
pub struct User {
    /// The unique identifier for the user.
    pub id: Uuid,
    /// The user's email address, used as the login name.
    pub email: String,
    /// The user's display name.
    pub name: String,
    /// The user's Argon2id password digest (PHC string).
    pub password_hash: String,
    /// The user's single role string.
    pub role: String,
    /// The timestamp when the user was created.
    pub created_at: DateTime<Utc>,
}

/// The fields needed to persist a new user.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: String,
}
