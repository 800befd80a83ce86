use anyhow::{Context, Result};
use axum::http::HeaderName;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::crypto::password::{DEFAULT_ITERATIONS, DEFAULT_MEMORY_KIB, DEFAULT_PARALLELISM};

/// Per-pipeline resource limits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Requests admitted per client address within one window.
    pub rate_limit: u32,
    /// Length of a fixed rate-limit window.
    pub rate_window: Duration,
    /// Largest request body accepted, in bytes.
    pub max_body_bytes: usize,
}

/// Where the double-submit CSRF secret is read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsrfConfig {
    pub cookie_name: String,
    pub header_name: String,
    pub form_field: String,
}

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The URL of the PostgreSQL database.
    pub database_url: String,
    /// The address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Whether cookies carry the `Secure` attribute.
    pub cookie_secure: bool,
    /// The lifetime of a session in hours.
    pub session_duration_hours: i64,
    /// Whether an inbound `x-request-id` from the fronting proxy is adopted.
    pub trust_request_id_header: bool,
    /// Deadline for each persistence lookup made by the identity stage and role guard.
    pub lookup_timeout: Duration,
    /// Limits for browser traffic.
    pub web: PipelineConfig,
    /// Limits for machine API traffic.
    pub api: PipelineConfig,
    pub csrf: CsrfConfig,
    pub argon2_memory_kib: u32,
    pub argon2_iterations: u32,
    pub argon2_parallelism: u32,
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", key)),
        None => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn bool_or<F>(lookup: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => parse_bool(&raw).with_context(|| format!("Invalid {}: expected true/false", key)),
        None => Ok(default),
    }
}

impl PipelineConfig {
    fn from_lookup<F>(lookup: &F, prefix: &str, defaults: PipelineConfig) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let window_secs = parse_or(
            lookup,
            &format!("{}_RATE_WINDOW_SECS", prefix),
            defaults.rate_window.as_secs(),
        )?;

        let config = Self {
            rate_limit: parse_or(lookup, &format!("{}_RATE_LIMIT", prefix), defaults.rate_limit)?,
            rate_window: Duration::from_secs(window_secs),
            max_body_bytes: parse_or(
                lookup,
                &format!("{}_MAX_BODY_BYTES", prefix),
                defaults.max_body_bytes,
            )?,
        };

        if config.rate_limit == 0 {
            anyhow::bail!("{}_RATE_LIMIT must be greater than zero", prefix);
        }
        if config.rate_window.is_zero() {
            anyhow::bail!("{}_RATE_WINDOW_SECS must be greater than zero", prefix);
        }
        if config.max_body_bytes == 0 {
            anyhow::bail!("{}_MAX_BODY_BYTES must be greater than zero", prefix);
        }

        Ok(config)
    }
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds and validates a `Config` from an arbitrary key lookup.
    ///
    /// Every invalid setting is a startup error; nothing is re-checked per request.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let is_production = lookup("APP_ENV")
            .unwrap_or_else(|| "development".to_string())
            == "production";

        let csrf = CsrfConfig {
            cookie_name: lookup("CSRF_COOKIE_NAME").unwrap_or_else(|| "csrf_token".to_string()),
            header_name: lookup("CSRF_HEADER_NAME")
                .unwrap_or_else(|| "x-csrf-token".to_string())
                .to_ascii_lowercase(),
            form_field: lookup("CSRF_FORM_FIELD").unwrap_or_else(|| "csrf_token".to_string()),
        };

        if csrf.cookie_name.trim().is_empty() {
            anyhow::bail!("CSRF_COOKIE_NAME must not be empty");
        }
        if csrf.form_field.trim().is_empty() {
            anyhow::bail!("CSRF_FORM_FIELD must not be empty");
        }
        HeaderName::from_str(&csrf.header_name)
            .context("CSRF_HEADER_NAME must be a valid HTTP header name")?;

        let config = Self {
            database_url: lookup("DATABASE_URL").context("DATABASE_URL must be set")?,
            bind_addr: parse_or(
                &lookup,
                "BIND_ADDR",
                SocketAddr::from(([127, 0, 0, 1], 3000)),
            )?,
            cookie_secure: bool_or(&lookup, "COOKIE_SECURE", is_production)?,
            session_duration_hours: parse_or(&lookup, "SESSION_DURATION_HOURS", 24 * 7)?,
            trust_request_id_header: bool_or(&lookup, "TRUST_REQUEST_ID_HEADER", false)?,
            lookup_timeout: Duration::from_millis(parse_or(&lookup, "LOOKUP_TIMEOUT_MS", 2_000)?),
            web: PipelineConfig::from_lookup(
                &lookup,
                "WEB",
                PipelineConfig {
                    rate_limit: 120,
                    rate_window: Duration::from_secs(60),
                    max_body_bytes: 1024 * 1024,
                },
            )?,
            api: PipelineConfig::from_lookup(
                &lookup,
                "API",
                PipelineConfig {
                    rate_limit: 60,
                    rate_window: Duration::from_secs(60),
                    max_body_bytes: 64 * 1024,
                },
            )?,
            csrf,
            argon2_memory_kib: parse_or(&lookup, "ARGON2_MEMORY_KIB", DEFAULT_MEMORY_KIB)?,
            argon2_iterations: parse_or(&lookup, "ARGON2_ITERATIONS", DEFAULT_ITERATIONS)?,
            argon2_parallelism: parse_or(&lookup, "ARGON2_PARALLELISM", DEFAULT_PARALLELISM)?,
        };

        if config.session_duration_hours <= 0 {
            anyhow::bail!("SESSION_DURATION_HOURS must be greater than zero");
        }
        if config.lookup_timeout.is_zero() {
            anyhow::bail!("LOOKUP_TIMEOUT_MS must be greater than zero");
        }

        Ok(config)
    }

    /// The fixed lifetime given to every new session.
    pub fn session_duration(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session_duration_hours)
    }

    /// The session lifetime in whole seconds, used for the cookie `Max-Age`.
    pub fn session_max_age_secs(&self) -> i64 {
        self.session_duration_hours * 3600
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let config = Config::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://localhost/vault")]))
            .unwrap();

        assert_eq!(config.bind_addr, SocketAddr::from(([127, 0, 0, 1], 3000)));
        assert!(!config.cookie_secure);
        assert!(!config.trust_request_id_header);
        assert_eq!(config.session_max_age_secs(), 7 * 24 * 3600);
        assert_eq!(config.web.rate_limit, 120);
        assert_eq!(config.api.max_body_bytes, 64 * 1024);
        assert!(config.web.max_body_bytes > config.api.max_body_bytes);
        assert_eq!(config.csrf.header_name, "x-csrf-token");
    }

    #[test]
    fn production_turns_on_secure_cookies() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/vault"),
            ("APP_ENV", "production"),
        ]))
        .unwrap();
        assert!(config.cookie_secure);

        let overridden = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/vault"),
            ("APP_ENV", "production"),
            ("COOKIE_SECURE", "false"),
        ]))
        .unwrap();
        assert!(!overridden.cookie_secure);
    }

    #[test]
    fn zero_rate_limit_fails_fast() {
        let err = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/vault"),
            ("API_RATE_LIMIT", "0"),
        ]))
        .err()
        .unwrap();
        assert!(err.to_string().contains("API_RATE_LIMIT"));
    }

    #[test]
    fn missing_database_url_is_an_error() {
        assert!(Config::from_lookup(lookup_from(&[])).is_err());
    }

    #[test]
    fn empty_csrf_settings_are_rejected() {
        assert!(Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/vault"),
            ("CSRF_COOKIE_NAME", " "),
        ]))
        .is_err());

        assert!(Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/vault"),
            ("CSRF_HEADER_NAME", "bad header"),
        ]))
        .is_err());
    }

    #[test]
    fn malformed_numbers_name_the_variable() {
        let err = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/vault"),
            ("WEB_RATE_WINDOW_SECS", "soon"),
        ]))
        .err()
        .unwrap();
        assert!(err.to_string().contains("WEB_RATE_WINDOW_SECS"));
    }
}
