//! Key naming conventions for the shared state store.
//!
//! Bucket state and history live under separate prefixes so they can carry
//! independent TTLs for the same client identifier.

/// Key holding token-bucket state for a client.
pub fn bucket_key(identifier: &str) -> String {
    format!("bucket:{identifier}")
}

/// Key holding the bounded request-history list for a client.
pub fn history_key(identifier: &str) -> String {
    format!("history:{identifier}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_are_distinct() {
        assert_eq!(bucket_key("alice"), "bucket:alice");
        assert_eq!(history_key("alice"), "history:alice");
        assert_ne!(bucket_key("x"), history_key("x"));
    }
}
