//! Salted PBKDF2-HMAC-SHA256 password hashes.
//!
//! Stored form: `pbkdf2-sha256$<rounds>$<salt b64>$<hash b64>`.

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use uuid::Uuid;

const SCHEME: &str = "pbkdf2-sha256";
const HASH_LEN: usize = 32;

fn derive(password: &str, salt: &[u8], rounds: u32) -> [u8; HASH_LEN] {
    let mut out = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, rounds, &mut out);
    out
}

pub fn hash_password(password: &str, rounds: u32) -> String {
    let rounds = rounds.max(1);
    let salt = Uuid::new_v4();
    let hash = derive(password, salt.as_bytes(), rounds);
    format!(
        "{}${}${}${}",
        SCHEME,
        rounds,
        STANDARD_NO_PAD.encode(salt.as_bytes()),
        STANDARD_NO_PAD.encode(hash)
    )
}

/// Check `password` against a stored hash. Malformed hashes are errors, a
/// wrong password is `Ok(false)`.
pub fn verify_password(password: &str, stored: &str) -> Result<bool> {
    let parts: Vec<&str> = stored.split('$').collect();
    let [scheme, rounds, salt, hash] = parts.as_slice() else {
        return Err(anyhow!("Malformed password hash"));
    };
    if *scheme != SCHEME {
        return Err(anyhow!("Unsupported password hash scheme: {}", scheme));
    }
    let rounds: u32 = rounds.parse().map_err(|_| anyhow!("Malformed password hash rounds"))?;
    let salt = STANDARD_NO_PAD.decode(salt)?;
    let expected = STANDARD_NO_PAD.decode(hash)?;

    let actual = derive(password, &salt, rounds);
    Ok(constant_time_eq(&actual, &expected))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() -> Result<()> {
        let stored = hash_password("s3cret!", 1000);
        assert!(stored.starts_with("pbkdf2-sha256$1000$"));
        assert!(verify_password("s3cret!", &stored)?);
        assert!(!verify_password("s3cret", &stored)?);
        Ok(())
    }

    #[test]
    fn test_salts_differ() {
        assert_ne!(hash_password("same", 10), hash_password("same", 10));
    }

    #[test]
    fn test_malformed_hash_is_error() {
        assert!(verify_password("x", "plaintext").is_err());
        assert!(verify_password("x", "md5$1$a$b").is_err());
        assert!(verify_password("x", "pbkdf2-sha256$many$a$b").is_err());
    }
}
