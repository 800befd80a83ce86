use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// How an authenticated principal proved who it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Credential {
    /// A server-side session found through the session cookie.
    Session,
    /// An API token presented as a bearer header.
    ApiToken,
}

/// The identity attached to a request by the identity stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    Anonymous,
    Authenticated { user_id: Uuid, credential: Credential },
}

impl Principal {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Principal::Authenticated { .. })
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Principal::Authenticated { user_id, .. } => Some(*user_id),
            Principal::Anonymous => None,
        }
    }

    pub fn credential(&self) -> Option<Credential> {
        match self {
            Principal::Authenticated { credential, .. } => Some(*credential),
            Principal::Anonymous => None,
        }
    }
}

/// The trace identifier assigned to a request and echoed back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
