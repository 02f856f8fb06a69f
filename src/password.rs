/// Password hashing with Argon2id
///
/// Hashes carry their own random salt and parameters in the PHC string, so
/// verification needs nothing beyond the stored hash.
use crate::error::{ServiceError, ServiceResult};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, SaltString},
    Argon2, PasswordVerifier,
};

/// One-way hashing and constant-time verification of user passwords.
///
/// Injected into the account service; tests substitute fakes.
pub trait PasswordHasher: Send + Sync {
    /// Hash a plaintext password. Fails only on catastrophic entropy error.
    fn hash(&self, plaintext: &str) -> ServiceResult<String>;

    /// Verify a plaintext against a stored hash. Returns false, never an
    /// error, on malformed hashes.
    fn verify(&self, hash: &str, plaintext: &str) -> bool;
}

/// Argon2id hasher with per-hash random salt
#[derive(Debug, Default, Clone)]
pub struct Argon2Hasher;

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, plaintext: &str) -> ServiceResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ServiceError::Internal(format!("Password hashing failed: {}", e)))
    }

    fn verify(&self, hash: &str, plaintext: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => Argon2::default()
                .verify_password(plaintext.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_round_trip() {
        let hasher = Argon2Hasher;
        let hash = hasher.hash("P@ssword1").unwrap();
        assert!(hasher.verify(&hash, "P@ssword1"));
        assert!(!hasher.verify(&hash, "P@ssword2"));
    }

    #[test]
    fn hash_is_opaque_and_salted() {
        let hasher = Argon2Hasher;
        let first = hasher.hash("correct horse battery staple").unwrap();
        let second = hasher.hash("correct horse battery staple").unwrap();
        assert_ne!(first, "correct horse battery staple");
        // Independent salts produce distinct hashes for the same input
        assert_ne!(first, second);
        assert!(hasher.verify(&second, "correct horse battery staple"));
    }

    #[test]
    fn malformed_hash_never_verifies() {
        let hasher = Argon2Hasher;
        assert!(!hasher.verify("not-a-phc-string", "anything"));
        assert!(!hasher.verify("", "anything"));
    }
}
