/// Password hashing and verification using Argon2id
///
/// Hashes are stored as PHC strings, so the salt and cost parameters travel
/// with the hash and verification needs no configuration.
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params,
};
use thiserror::Error;

/// Shortest password accepted at registration
pub const MIN_PASSWORD_LENGTH: usize = 6;

/// Password hashing and verification errors
#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    HashingFailed(String),

    #[error("Failed to verify password: {0}")]
    VerificationFailed(String),

    #[error("Invalid password hash format")]
    InvalidHashFormat,

    #[error("Password must be at least {MIN_PASSWORD_LENGTH} characters long")]
    TooShort,
}

/// Argon2 cost parameters used when hashing new passwords
#[derive(Debug, Clone)]
pub struct PasswordConfig {
    /// Memory cost in KB (default: 65536 = 64 MB)
    pub memory_cost: u32,
    /// Iterations (default: 3)
    pub time_cost: u32,
    /// Lanes (default: 4)
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_cost: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl PasswordConfig {
    /// Minimal cost parameters for tests and local tooling
    pub fn fast() -> Self {
        Self {
            memory_cost: 8,
            time_cost: 1,
            parallelism: 1,
        }
    }

    fn hasher(&self) -> Result<Argon2<'static>, PasswordError> {
        let params = Params::new(self.memory_cost, self.time_cost, self.parallelism, Some(32))
            .map_err(|e| PasswordError::HashingFailed(e.to_string()))?;
        Ok(Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            params,
        ))
    }
}

/// Reject passwords below the minimum length (counted in characters)
pub fn check_password_policy(password: &str) -> Result<(), PasswordError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(PasswordError::TooShort);
    }
    Ok(())
}

/// Hash a plaintext password with the default cost parameters
///
/// # Example
///
/// ```no_run
/// use identity_api::auth::password::{hash_password, verify_password};
///
/// let hash = hash_password("secret123").unwrap();
/// assert!(verify_password("secret123", &hash).unwrap());
/// ```
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    hash_password_with_config(password, &PasswordConfig::default())
}

/// Hash a plaintext password, returning a PHC string with a random salt
pub fn hash_password_with_config(
    password: &str,
    config: &PasswordConfig,
) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);

    let hash = config
        .hasher()?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))?;

    Ok(hash.to_string())
}

/// Verify a plaintext password against a stored PHC hash
///
/// # Returns
///
/// * `Ok(true)` - Password matches
/// * `Ok(false)` - Password does not match
/// * `Err(PasswordError)` - The stored hash could not be parsed or checked
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed = PasswordHash::new(hash).map_err(|_| PasswordError::InvalidHashFormat)?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::VerificationFailed(e.to_string())),
    }
}
