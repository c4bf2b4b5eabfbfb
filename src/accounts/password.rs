//! Password hashing with PBKDF2-HMAC-SHA256.
//!
//! Hashes are stored as `pbkdf2-sha256$<rounds>$<salt hex>$<digest hex>`.

use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

const SCHEME: &str = "pbkdf2-sha256";
#[cfg(not(test))]
const ROUNDS: u32 = 100_000;
#[cfg(test)]
const ROUNDS: u32 = 1_000;
const SALT_LEN: usize = 16;
const DIGEST_LEN: usize = 32;

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Password must be at least 6 characters")]
    TooShort,

    #[error("Stored password hash is malformed")]
    MalformedHash,
}

pub fn validate_password(password: &str) -> Result<(), PasswordError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(PasswordError::TooShort);
    }
    Ok(())
}

fn derive(password: &str, salt: &[u8], rounds: u32) -> [u8; DIGEST_LEN] {
    let mut out = [0u8; DIGEST_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, rounds, &mut out);
    out
}

pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let digest = derive(password, &salt, ROUNDS);
    format!(
        "{}${}${}${}",
        SCHEME,
        ROUNDS,
        hex::encode(salt),
        hex::encode(digest)
    )
}

pub fn verify_password(password: &str, stored: &str) -> Result<bool, PasswordError> {
    let mut parts = stored.split('$');
    let (Some(scheme), Some(rounds), Some(salt), Some(digest), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return Err(PasswordError::MalformedHash);
    };

    if scheme != SCHEME {
        return Err(PasswordError::MalformedHash);
    }
    let rounds: u32 = rounds.parse().map_err(|_| PasswordError::MalformedHash)?;
    let salt = hex::decode(salt).map_err(|_| PasswordError::MalformedHash)?;
    let expected = hex::decode(digest).map_err(|_| PasswordError::MalformedHash)?;
    if rounds == 0 || expected.len() != DIGEST_LEN {
        return Err(PasswordError::MalformedHash);
    }

    let actual = derive(password, &salt, rounds);
    Ok(constant_time_eq(&actual, &expected))
}

pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
