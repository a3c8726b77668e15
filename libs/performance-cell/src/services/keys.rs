/// Cache key layout.
///
/// Single entities live at `cache:<entity>:<id>`; paginated lists live at
/// `cache:<entity>-list:<selector>:<selector_id>:limit:<n>:offset:<m>`, so every
/// page cached for one selector shares the prefix returned by [`CacheKey::list_prefix`].
pub struct CacheKey;

impl CacheKey {
    pub fn entity(entity: &str, id: &str) -> String {
        format!("cache:{}:{}", entity, id)
    }

    pub fn list(entity: &str, selector: &str, selector_id: &str, limit: u32, offset: u32) -> String {
        format!(
            "{}limit:{}:offset:{}",
            Self::list_prefix(entity, selector, selector_id),
            limit,
            offset
        )
    }

    /// Ends with `:` so one selector id never matches another that merely starts with it.
    pub fn list_prefix(entity: &str, selector: &str, selector_id: &str) -> String {
        format!("cache:{}-list:{}:{}:", entity, selector, selector_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_key_shares_selector_prefix() {
        let key = CacheKey::list("appointment", "doctor", "d-1", 10, 20);
        assert_eq!(key, "cache:appointment-list:doctor:d-1:limit:10:offset:20");
        assert!(key.starts_with(&CacheKey::list_prefix("appointment", "doctor", "d-1")));
        assert!(!key.starts_with(&CacheKey::list_prefix("appointment", "doctor", "d")));
    }

    #[test]
    fn test_entity_key() {
        assert_eq!(CacheKey::entity("appointment", "42"), "cache:appointment:42");
    }
}
