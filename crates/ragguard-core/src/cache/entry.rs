//! Cache entries and value size estimation

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Size charged for values that cannot estimate themselves
pub const DEFAULT_ENTRY_SIZE: usize = 1024;

/// Approximate in-memory footprint of a cached value, in bytes
pub trait EstimateSize {
    fn estimated_size(&self) -> usize {
        DEFAULT_ENTRY_SIZE
    }
}

impl EstimateSize for String {
    fn estimated_size(&self) -> usize {
        self.len()
    }
}

impl EstimateSize for Vec<u8> {
    fn estimated_size(&self) -> usize {
        self.len()
    }
}

/// Embedding vectors
impl EstimateSize for Vec<f32> {
    fn estimated_size(&self) -> usize {
        self.len() * std::mem::size_of::<f32>()
    }
}

impl EstimateSize for Vec<String> {
    fn estimated_size(&self) -> usize {
        self.iter().map(String::len).sum()
    }
}

/// Structured values are charged their serialized length
impl EstimateSize for serde_json::Value {
    fn estimated_size(&self) -> usize {
        serde_json::to_vec(self)
            .map(|bytes| bytes.len())
            .unwrap_or(DEFAULT_ENTRY_SIZE)
    }
}

impl<T: EstimateSize + ?Sized> EstimateSize for Arc<T> {
    fn estimated_size(&self) -> usize {
        (**self).estimated_size()
    }
}

/// Ordering key in the eviction index: lowest key is evicted first
pub(crate) type RankKey = (u64, u64);

/// A cached value with its bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
    pub last_accessed_at: Instant,
    pub access_count: u64,
    pub ttl: Option<Duration>,
    pub size_bytes: usize,
    pub(crate) rank: RankKey,
}

impl<V> CacheEntry<V> {
    pub(crate) fn new(value: V, ttl: Option<Duration>, size_bytes: usize, now: Instant) -> Self {
        Self {
            value,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            ttl,
            size_bytes,
            rank: (0, 0),
        }
    }

    /// An entry expires once its age exceeds its TTL
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.saturating_duration_since(self.created_at) > ttl,
            None => false,
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_estimates() {
        assert_eq!("hello".to_string().estimated_size(), 5);
        assert_eq!(vec![0.0f32; 384].estimated_size(), 1536);
        assert_eq!(
            serde_json::json!({"a": 1}).estimated_size(),
            r#"{"a":1}"#.len()
        );
        assert_eq!(Arc::new("abc".to_string()).estimated_size(), 3);

        struct Opaque;
        impl EstimateSize for Opaque {}
        assert_eq!(Opaque.estimated_size(), DEFAULT_ENTRY_SIZE);
    }

    #[test]
    fn test_expiry_is_strictly_after_ttl() {
        let now = Instant::now();
        let entry = CacheEntry::new(1u8, Some(Duration::from_millis(100)), 1, now);

        assert!(!entry.is_expired(now));
        assert!(!entry.is_expired(now + Duration::from_millis(100)));
        assert!(entry.is_expired(now + Duration::from_millis(101)));

        let forever = CacheEntry::new(1u8, None, 1, now);
        assert!(!forever.is_expired(now + Duration::from_secs(86_400)));
    }
}
