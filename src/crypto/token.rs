use crate::error::{AppError, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// The number of random bytes in a session token (256 bits).
pub const TOKEN_BYTES: usize = 32;
/// The length of an encoded token: two hex characters per byte.
pub const TOKEN_LEN: usize = TOKEN_BYTES * 2;

/// Generates a new opaque session token from the OS random source.
///
/// # Returns
///
/// A lowercase hex string of exactly `TOKEN_LEN` characters, or
/// `AppError::Entropy` if the OS could not supply random bytes. There is no
/// weaker fallback: a session must not be issued without one.
pub fn generate_token() -> Result<String> {
    generate_token_with(&mut OsRng)
}

fn generate_token_with<R: RngCore + ?Sized>(rng: &mut R) -> Result<String> {
    let mut token = [0u8; TOKEN_BYTES];
    rng.try_fill_bytes(&mut token)
        .map_err(|e| AppError::Entropy(format!("Failed to generate token: {}", e)))?;

    Ok(hex::encode(token))
}

static FALLBACK_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generates a request trace identifier.
///
/// Request ids are only a debugging aid, so if the OS random source fails this
/// falls back to a timestamp plus a process-wide sequence number.
pub fn generate_request_id() -> String {
    request_id_with(&mut OsRng)
}

fn request_id_with<R: RngCore + ?Sized>(rng: &mut R) -> String {
    let mut bytes = [0u8; 16];
    match rng.try_fill_bytes(&mut bytes) {
        Ok(()) => uuid::Builder::from_random_bytes(bytes)
            .into_uuid()
            .hyphenated()
            .to_string(),
        Err(e) => {
            tracing::warn!("⚠️ Entropy unavailable for request id, using timestamp: {}", e);
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or_default();
            let seq = FALLBACK_SEQUENCE.fetch_add(1, Ordering::Relaxed);
            format!("ts-{:x}-{:x}", nanos, seq)
        }
    }
}

/// Checks whether a caller-supplied request id is safe to adopt and echo.
pub fn is_acceptable_request_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 128
        && value.bytes().all(|b| b.is_ascii_graphic())
}
