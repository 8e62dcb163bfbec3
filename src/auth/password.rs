use crate::error::AppResult;

/// Salted bcrypt hash of `plaintext`.
pub fn hash_password(plaintext: &str, cost: u32) -> AppResult<String> {
    Ok(bcrypt::hash(plaintext, cost)?)
}

/// Verify plaintext against a stored hash - constant-time via bcrypt.
/// A malformed hash never verifies.
pub fn verify_password(plaintext: &str, hash: &str) -> bool {
    bcrypt::verify(plaintext, hash).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const COST: u32 = 4;

    #[test]
    fn hash_verifies_and_is_salted() {
        let a = hash_password("hunter2", COST).unwrap();
        let b = hash_password("hunter2", COST).unwrap();
        assert_ne!(a, b);
        assert!(verify_password("hunter2", &a));
        assert!(verify_password("hunter2", &b));
    }

    #[test]
    fn wrong_password_fails() {
        let hash = hash_password("hunter2", COST).unwrap();
        assert!(!verify_password("hunter3", &hash));
    }

    #[test]
    fn malformed_hash_fails() {
        assert!(!verify_password("anything", "not-a-bcrypt-hash"));
    }
}
