//! Identifier generation for trace, request, and execution ids.
//!
//! Ids are UUIDv7 rendered as 32 lowercase hex characters without hyphens.
//! UUIDv7 mixes a millisecond timestamp with random bits, so ids are unique,
//! independent of request content, and sort by creation time.

use uuid::Uuid;

/// Generate a fresh identifier.
#[inline]
pub fn generate_id() -> String {
    Uuid::now_v7().simple().to_string()
}

/// Return the inherited id when present and non-blank, otherwise a fresh one.
pub fn inherit_or_generate(inherited: Option<&str>) -> String {
    match inherited.map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => generate_id(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_id_shape() {
        let id = generate_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_generate_id_unique() {
        let ids: HashSet<String> = (0..1000).map(|_| generate_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_generate_id_time_ordered() {
        let first = generate_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = generate_id();
        assert!(second > first);
    }

    #[test]
    fn test_inherit_or_generate() {
        assert_eq!(inherit_or_generate(Some("abc123")), "abc123");
        assert_eq!(inherit_or_generate(Some("  abc123 ")), "abc123");
        assert_eq!(inherit_or_generate(Some("")).len(), 32);
        assert_eq!(inherit_or_generate(None).len(), 32);
    }
}
