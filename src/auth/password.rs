//! Password hashing.

use argon2::{Algorithm, Argon2, Params, PasswordHasher as _, PasswordVerifier as _, Version};
use password_hash::{PasswordHash, SaltString};

use crate::auth::AuthError;

/// Strategy for hashing and verifying passwords.
pub trait PasswordHasher: Send + Sync {
    /// Produce a self-describing digest of `password`.
    fn hash(&self, password: &str) -> Result<String, AuthError>;

    /// Whether `password` matches `hash`. An unparseable hash never matches.
    fn verify(&self, password: &str, hash: &str) -> bool;
}

/// Argon2id with PHC string output.
#[derive(Clone, Default)]
pub struct Argon2PasswordHasher {
    params: Option<Params>,
}

impl Argon2PasswordHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use explicit cost parameters instead of the argon2 defaults.
    pub fn with_params(params: Params) -> Self {
        Self { params: Some(params) }
    }

    fn argon2(&self) -> Argon2<'static> {
        match &self.params {
            Some(params) => Argon2::new(Algorithm::Argon2id, Version::V0x13, params.clone()),
            None => Argon2::default(),
        }
    }
}

impl PasswordHasher for Argon2PasswordHasher {
    fn hash(&self, password: &str) -> Result<String, AuthError> {
        let mut salt_bytes = [0u8; 16];
        getrandom::getrandom(&mut salt_bytes).map_err(|e| AuthError::Internal(e.to_string()))?;
        let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| AuthError::Internal(e.to_string()))?;

        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Internal(format!("password hashing failed: {e}")))
    }

    fn verify(&self, password: &str, hash: &str) -> bool {
        // Parameters are read from the PHC string, so any Argon2 instance
        // can verify digests produced with other costs.
        match PasswordHash::new(hash) {
            Ok(parsed) => self.argon2().verify_password(password.as_bytes(), &parsed).is_ok(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
pub(crate) fn fast_hasher() -> Argon2PasswordHasher {
    Argon2PasswordHasher::with_params(Params::new(64, 1, 1, None).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hasher = fast_hasher();
        let hash = hasher.hash("s3cretpw").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("s3cretpw", &hash));
        assert!(!hasher.verify("wrongpw", &hash));
    }

    #[test]
    fn test_salts_differ() {
        let hasher = fast_hasher();
        assert_ne!(hasher.hash("s3cretpw").unwrap(), hasher.hash("s3cretpw").unwrap());
    }

    #[test]
    fn test_garbage_hash_never_matches() {
        let hasher = fast_hasher();
        assert!(!hasher.verify("s3cretpw", "not-a-phc-string"));
        assert!(!hasher.verify("s3cretpw", ""));
    }

    #[test]
    fn test_default_params_verify_fast_hash() {
        let hash = fast_hasher().hash("s3cretpw").unwrap();
        assert!(Argon2PasswordHasher::new().verify("s3cretpw", &hash));
    }
}
