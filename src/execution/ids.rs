//! Placeholder vs. confirmed execution identifiers.
//!
//! A run started from the UI gets a client-minted placeholder id right away;
//! the backend later hands back the confirmed id. The two are told apart purely
//! by a reserved prefix.

/// Reserved prefix carried by every client-minted execution id.
pub const PLACEHOLDER_PREFIX: &str = "pending-";

/// True if `id` was minted locally and has not been confirmed by the backend.
pub fn is_placeholder(id: &str) -> bool {
    id.starts_with(PLACEHOLDER_PREFIX)
}

/// True if `id` was assigned by the backend.
pub fn is_confirmed(id: &str) -> bool {
    !is_placeholder(id)
}

/// Mint a fresh placeholder id.
pub fn new_placeholder_id() -> String {
    format!("{}{}", PLACEHOLDER_PREFIX, uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_prefix() {
        assert!(is_placeholder("pending-1"));
        assert!(is_placeholder("pending-"));
        assert!(!is_placeholder("exec-1"));
        assert!(!is_placeholder("xpending-1"));
        assert!(!is_placeholder(""));
    }

    #[test]
    fn test_confirmed_is_complement() {
        for id in ["pending-abc", "exec-1", "", "PENDING-1"] {
            assert_eq!(is_confirmed(id), !is_placeholder(id));
        }
    }

    #[test]
    fn test_minted_ids_are_unique_placeholders() {
        let a = new_placeholder_id();
        let b = new_placeholder_id();
        assert!(is_placeholder(&a));
        assert!(is_placeholder(&b));
        assert_ne!(a, b);
    }
}
