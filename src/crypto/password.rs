use crate::error::{AppError, Result};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Argon2, Params, ParamsBuilder,
};
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

/// The longest plaintext accepted, in bytes. Longer input is rejected, never truncated.
pub const MAX_PASSWORD_BYTES: usize = 72;

/// The memory cost for Argon2 in KiB.
pub const DEFAULT_MEMORY_KIB: u32 = 19 * 1024;
/// The number of iterations for Argon2.
pub const DEFAULT_ITERATIONS: u32 = 2;
/// The parallelism factor for Argon2.
pub const DEFAULT_PARALLELISM: u32 = 1;

/// One-way, salted Argon2id hashing with a tunable work factor.
#[derive(Clone, Debug)]
pub struct PasswordHasher {
    params: Params,
}

impl PasswordHasher {
    /// Creates a hasher with the given Argon2 work factor.
    ///
    /// # Arguments
    ///
    /// * `memory_kib` - Memory cost in KiB.
    /// * `iterations` - Number of passes over memory.
    /// * `parallelism` - Number of lanes.
    ///
    /// # Returns
    ///
    /// A `Result` containing the hasher, or `AppError::Hashing` when Argon2
    /// rejects the parameters.
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self> {
        let params = ParamsBuilder::new()
            .m_cost(memory_kib)
            .t_cost(iterations)
            .p_cost(parallelism)
            .build()
            .map_err(|e| AppError::Hashing(format!("Argon2 params: {}", e)))?;

        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            self.params.clone(),
        )
    }

    /// Hashes a password into a PHC-format digest with a fresh random salt.
    pub fn hash(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Err(AppError::Validation("Password cannot be empty".to_string()));
        }
        if plaintext.len() > MAX_PASSWORD_BYTES {
            return Err(AppError::Validation(format!(
                "Password must be at most {} bytes",
                MAX_PASSWORD_BYTES
            )));
        }

        let password_bytes = Zeroizing::new(plaintext.as_bytes().to_vec());

        let mut salt_bytes = [0u8; 16];
        OsRng
            .try_fill_bytes(&mut salt_bytes)
            .map_err(|e| AppError::Entropy(format!("Failed to generate salt: {}", e)))?;

        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| AppError::Hashing(format!("Salt encoding error: {}", e)))?;

        let digest = self
            .argon2()
            .hash_password(&password_bytes, &salt)
            .map_err(|e| AppError::Hashing(format!("Argon2 hash error: {}", e)))?
            .to_string();

        tracing::debug!("Password hashed successfully with Argon2");
        Ok(digest)
    }

    /// Checks a plaintext against a stored digest.
    ///
    /// The comparison is the algorithm's own constant-time check. A digest that
    /// cannot be parsed, or an over-long plaintext, simply does not verify.
    pub fn verify(&self, digest: &str, plaintext: &str) -> bool {
        if plaintext.len() > MAX_PASSWORD_BYTES {
            return false;
        }

        let parsed = match PasswordHash::new(digest) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("❌ Stored password digest is malformed: {}", e);
                return false;
            }
        };

        let password_bytes = Zeroizing::new(plaintext.as_bytes().to_vec());
        self.argon2()
            .verify_password(&password_bytes, &parsed)
            .is_ok()
    }
}
