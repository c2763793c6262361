//! API-key check. An empty key set means open dev mode.

pub fn check_api_key(configured: &[String], provided: Option<&str>) -> bool {
    if configured.is_empty() {
        return true;
    }
    provided.is_some_and(|key| configured.iter().any(|k| k == key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_set_allows_everyone() {
        assert!(check_api_key(&[], None));
        assert!(check_api_key(&[], Some("anything")));
    }

    #[test]
    fn configured_keys_are_enforced() {
        let keys = vec!["demo_123".to_string(), "demo_456".to_string()];
        assert!(check_api_key(&keys, Some("demo_123")));
        assert!(check_api_key(&keys, Some("demo_456")));
        assert!(!check_api_key(&keys, Some("wrong")));
        assert!(!check_api_key(&keys, None));
    }
}
