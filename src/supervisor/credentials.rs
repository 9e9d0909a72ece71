//! API key issuance.

use rand::{distributions::Alphanumeric, Rng};

/// Length of issued keys.
pub const API_KEY_LEN: usize = 32;

/// Issue a new random alphanumeric API key.
pub fn generate_api_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(API_KEY_LEN)
        .map(char::from)
        .collect()
}

/// Compare a presented key against the issued one in time independent of
/// where they first differ.
pub fn keys_match(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Keep the first four characters for log output.
pub fn mask_api_key(key: &str) -> String {
    let visible: String = key.chars().take(4).collect();
    format!("{}{}", visible, "*".repeat(key.chars().count().saturating_sub(4)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_are_alphanumeric_and_distinct() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_eq!(a.len(), API_KEY_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_keys_match() {
        assert!(keys_match("abc123", "abc123"));
        assert!(!keys_match("abc124", "abc123"));
        assert!(!keys_match("abc12", "abc123"));
        assert!(!keys_match("", "abc123"));
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask_api_key("abc123"), "abc1**");
        assert_eq!(mask_api_key("ab"), "ab");
    }
}
