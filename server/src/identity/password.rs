use argon2::Argon2;
use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use rand::RngCore;

use crate::identity::IdentityError;

/// Hash a password into an argon2id PHC string for the user directory.
pub fn hash_password(password: &str) -> Result<String, IdentityError> {
    let mut salt_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| IdentityError::PasswordHash(e.to_string()))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| IdentityError::PasswordHash(e.to_string()))
}

/// `Ok(false)` for a wrong password; `Err` only for an unparseable hash.
pub fn verify_password(password: &str, phc: &str) -> Result<bool, IdentityError> {
    let parsed = PasswordHash::new(phc).map_err(|e| IdentityError::PasswordHash(e.to_string()))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(e) => Err(IdentityError::PasswordHash(e.to_string())),
    }
}
