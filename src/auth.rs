use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Stored form is `salt$hex(sha256(salt + password))`. Not bcrypt, but
/// salted and one-way, which is all the daemon needs locally.
pub fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    format!("{}${}", salt, digest_hex(&salt, password))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt, expected)) = stored.split_once('$') else {
        return false;
    };
    digest_hex(salt, password) == expected
}

fn digest_hex(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Opaque bearer token for a signed-in user.
pub fn new_session_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// 8-character upper-case certificate validation code.
pub fn new_validation_code() -> String {
    let raw = Uuid::new_v4().simple().to_string().to_uppercase();
    raw[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_round_trips_and_salts_differ() {
        let a = hash_password("admin123");
        let b = hash_password("admin123");
        assert_ne!(a, b);
        assert!(verify_password("admin123", &a));
        assert!(verify_password("admin123", &b));
        assert!(!verify_password("admin124", &a));
    }

    #[test]
    fn malformed_stored_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-valid-hash"));
        assert!(!verify_password("", ""));
    }

    #[test]
    fn validation_codes_are_eight_upper_chars() {
        let code = new_validation_code();
        assert_eq!(code.len(), 8);
        assert!(code
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }
}
