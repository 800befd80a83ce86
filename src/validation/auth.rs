use garde::Validate;
use serde::Deserialize;

use crate::error::{AppError, Result};

/// The form payload for signing in.
#[derive(Deserialize, Validate)]
pub struct LoginForm {
    #[garde(email)]
    pub email: String,
    #[garde(length(min = 1, max = 72))]
    pub password: String,
    #[garde(skip)]
    #[serde(default)]
    pub return_to: Option<String>,
}

/// The form payload for creating an account.
#[derive(Deserialize, Validate)]
pub struct SignupForm {
    #[garde(length(min = 1, max = 100))]
    pub name: String,
    #[garde(email)]
    pub email: String,
    #[garde(length(min = 8, max = 72))]
    pub password: String,
}

// Hand-written so the plaintext never reaches a log line.
impl std::fmt::Debug for LoginForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginForm")
            .field("email", &self.email)
            .field("return_to", &self.return_to)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for SignupForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignupForm")
            .field("name", &self.name)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Runs the form's `garde` rules.
///
/// # Returns
///
/// `AppError::Validation` carrying the report's field messages when a rule fails.
pub fn validate_form<T: Validate<Context = ()>>(form: &T) -> Result<()> {
    form.validate()
        .map_err(|report| AppError::Validation(report.to_string()))
}

/// Normalises an email address for lookup and storage.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// Returns `candidate` if it is a same-site relative path, otherwise `/`.
///
/// Rejects absolute URLs, scheme-relative `//host` paths, backslashes (which some
/// browsers treat as slashes) and control characters.
pub fn safe_return_to(candidate: Option<&str>) -> String {
    match candidate {
        Some(path)
            if path.starts_with('/')
                && !path.starts_with("//")
                && !path.contains('\\')
                && !path.chars().any(char::is_control) =>
        {
            path.to_string()
        }
        _ => "/".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::password::MAX_PASSWORD_BYTES;

    #[test]
    fn signup_rules_reject_short_passwords_and_bad_emails() {
        let form = SignupForm {
            name: "Ada".to_string(),
            email: "not-an-email".to_string(),
            password: "short".to_string(),
        };
        let err = validate_form(&form).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("email"));
        assert!(message.contains("password"));

        let form = SignupForm {
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            password: "correct horse".to_string(),
        };
        assert!(validate_form(&form).is_ok());
    }

    #[test]
    fn over_long_password_fails_validation() {
        let form = LoginForm {
            email: "ada@example.com".to_string(),
            password: "p".repeat(MAX_PASSWORD_BYTES + 1),
            return_to: None,
        };
        assert!(validate_form(&form).is_err());
    }

    #[test]
    fn debug_output_omits_password() {
        let form = LoginForm {
            email: "ada@example.com".to_string(),
            password: "hunter22".to_string(),
            return_to: None,
        };
        assert!(!format!("{:?}", form).contains("hunter22"));
    }

    #[test]
    fn return_to_only_allows_local_paths() {
        assert_eq!(safe_return_to(Some("/records?page=2")), "/records?page=2");
        assert_eq!(safe_return_to(Some("https://evil.example")), "/");
        assert_eq!(safe_return_to(Some("//evil.example")), "/");
        assert_eq!(safe_return_to(Some("/\\evil.example")), "/");
        assert_eq!(safe_return_to(Some("/a\nb")), "/");
        assert_eq!(safe_return_to(None), "/");
    }

    #[test]
    fn emails_are_trimmed_and_lowercased() {
        assert_eq!(normalize_email("  Ada@Example.COM "), "ada@example.com");
    }
}
