//! Cache keys for outbound requests

use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Key a request by its full serialized body under `namespace`.
///
/// Everything that shapes the response (model, messages, sampling
/// parameters) is part of the body, so two requests share a key only when
/// they would produce interchangeable answers.
pub fn request_cache_key<T: Serialize>(namespace: &str, request: &T) -> serde_json::Result<String> {
    let body = serde_json::to_vec(request)?;
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    Ok(format!("{}:{:016x}", namespace, hasher.finish()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_covers_whole_request() {
        let base = json!({"model": "m", "messages": ["hi"], "temperature": 0.2});
        let warmer = json!({"model": "m", "messages": ["hi"], "temperature": 0.9});

        let key = request_cache_key("chat", &base).unwrap();
        assert_eq!(key, request_cache_key("chat", &base).unwrap());
        assert!(key.starts_with("chat:"));
        assert_ne!(key, request_cache_key("chat", &warmer).unwrap());
        assert_ne!(key, request_cache_key("rerank", &base).unwrap());
    }
}
