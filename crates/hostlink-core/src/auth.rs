//! Salted SHA-256 challenge/response authentication.
//!
//! The server stores a *secret* derived from the operator's password and a
//! long-lived salt.  For every connection it issues a fresh random
//! *challenge* in the Hello frame.  The client proves it knows the password by
//! sending
//!
//! ```text
//! secret         = base64(sha256(password + salt))
//! authentication = base64(sha256(secret + challenge))
//! ```
//!
//! The password itself never crosses the wire, and a captured authentication
//! string is useless on any other connection because the challenge differs.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Number of random bytes in a salt or challenge before base64 encoding.
const RANDOM_TOKEN_BYTES: usize = 32;

/// Generates a new random salt.
pub fn generate_salt() -> String {
    random_token()
}

/// Generates a fresh per-connection challenge.
pub fn generate_challenge() -> String {
    random_token()
}

/// Derives the stored secret from a password and salt.
pub fn generate_secret(password: &str, salt: &str) -> String {
    hash_concat(password, salt)
}

/// The authentication string a client must send for `secret` and `challenge`.
pub fn expected_authentication_string(secret: &str, challenge: &str) -> String {
    hash_concat(secret, challenge)
}

/// Checks a client-supplied authentication string.
///
/// The comparison runs in constant time with respect to the content of the
/// strings.
///
/// # Examples
///
/// ```rust
/// use hostlink_core::auth::{check_authentication_string, expected_authentication_string, generate_secret};
///
/// let secret = generate_secret("hunter2", "salt");
/// let auth = expected_authentication_string(&secret, "challenge");
/// assert!(check_authentication_string(&secret, "challenge", &auth));
/// assert!(!check_authentication_string(&secret, "other-challenge", &auth));
/// ```
pub fn check_authentication_string(secret: &str, challenge: &str, provided: &str) -> bool {
    let expected = expected_authentication_string(secret, challenge);
    bool::from(expected.as_bytes().ct_eq(provided.as_bytes()))
}

fn hash_concat(first: &str, second: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(first.as_bytes());
    hasher.update(second.as_bytes());
    BASE64.encode(hasher.finalize())
}

fn random_token() -> String {
    let mut bytes = [0u8; RANDOM_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
