use crate::error::{AppError, AppResult};

pub const MIN_PASSWORD_LEN: usize = 8;

pub fn validate_password(plaintext: &str) -> AppResult<()> {
    if plaintext.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

pub fn hash_password(plaintext: &str, cost: u32) -> AppResult<String> {
    bcrypt::hash(plaintext, cost).map_err(|e| AppError::Internal(format!("bcrypt: {}", e)))
}

/// Constant-time check via bcrypt; a malformed hash never verifies.
pub fn verify_password(plaintext: &str, hash: &str) -> bool {
    bcrypt::verify(plaintext, hash).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("correct horse", 4).unwrap();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
    }

    #[test]
    fn short_password_rejected() {
        assert!(matches!(
            validate_password("short"),
            Err(AppError::BadRequest(_))
        ));
        assert!(validate_password("1234567").is_err());
        assert!(validate_password("12345678").is_ok());
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-bcrypt-hash"));
    }
}
