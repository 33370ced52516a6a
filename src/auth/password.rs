use argon2::{
    password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::error;

/// One-way adaptive hash of a plaintext credential. Only called when the
/// credential actually changes (signup, reset, update-password); rehashing
/// an unchanged secret would be pure waste.
pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

/// Random reset token. The plaintext goes out by mail; only the digest is
/// ever persisted, so a leaked users table yields no usable tokens.
pub fn issue_reset_token() -> (String, String) {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    let plain = hex::encode(bytes);
    let digest = hash_reset_token(&plain);
    (plain, digest)
}

pub fn hash_reset_token(plain: &str) -> String {
    hex::encode(Sha256::digest(plain.as_bytes()))
}

/// True when the credential was rotated after the token was issued, which
/// invalidates the token even inside its own expiry window.
pub fn changed_after(password_changed_at: Option<OffsetDateTime>, token_issued_at: i64) -> bool {
    match password_changed_at {
        Some(changed_at) => changed_at.unix_timestamp() > token_issued_at,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn hash_and_verify_roundtrip() {
        let password = "Secur3P@ssw0rd!";
        let hash = hash_password(password).expect("hashing should succeed");
        assert!(verify_password(password, &hash).expect("verify should succeed"));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let password = "correct-horse-battery-staple";
        let hash = hash_password(password).expect("hashing should succeed");
        assert!(!verify_password("wrong-password", &hash).expect("verify should not error"));
    }

    #[test]
    fn verify_errors_on_malformed_hash() {
        let err = verify_password("anything", "not-a-valid-hash").unwrap_err();
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn reset_token_plaintext_is_not_its_digest() {
        let (plain, digest) = issue_reset_token();
        assert_ne!(plain, digest);
        assert_eq!(hash_reset_token(&plain), digest);
        assert_eq!(plain.len(), 64);
    }

    #[test]
    fn reset_tokens_are_unique() {
        let (a, _) = issue_reset_token();
        let (b, _) = issue_reset_token();
        assert_ne!(a, b);
    }

    #[test]
    fn rotation_after_issue_invalidates_token() {
        let issued_at = OffsetDateTime::now_utc().unix_timestamp();
        let rotated = OffsetDateTime::now_utc() + Duration::minutes(5);
        assert!(changed_after(Some(rotated), issued_at));
    }

    #[test]
    fn rotation_before_issue_keeps_token_valid() {
        let rotated = OffsetDateTime::now_utc();
        let issued_at = (rotated + Duration::minutes(5)).unix_timestamp();
        assert!(!changed_after(Some(rotated), issued_at));
        assert!(!changed_after(None, issued_at));
    }
}
