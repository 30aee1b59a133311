//! Agent secret hashing.
//!
//! Agents authenticate with a per-VM secret. Only the SHA-256 digest of the
//! secret is stored, so lookups hash the presented value first.

use sha2::{Digest, Sha256};

/// Compute the lowercase hex SHA-256 digest of an agent secret.
pub fn hash_agent_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_hex() {
        let a = hash_agent_secret("vm-7-secret");
        let b = hash_agent_secret("vm-7-secret");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_secrets_differ() {
        assert_ne!(hash_agent_secret("one"), hash_agent_secret("two"));
    }
}
