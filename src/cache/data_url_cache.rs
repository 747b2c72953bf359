use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Thread-safe LRU cache of encoded image data URLs
///
/// Crops of one map are attached to many questions; keeping their base64
/// encoding around avoids re-reading and re-encoding them per question.
pub struct DataUrlCache {
    cache: Mutex<LruCache<String, String>>,
}

impl DataUrlCache {
    /// Create a new cache holding at most `capacity` data URLs (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);

        Self {
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Get the data URL cached for a key
    pub fn get(&self, key: &str) -> Option<String> {
        self.cache.lock().ok()?.get(key).cloned()
    }

    /// Store a data URL
    pub fn put(&self, key: String, data_url: String) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, data_url);
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_put_and_get() {
        let cache = DataUrlCache::new(10);
        cache.put("det/E1/title_0.png".to_string(), "data:image/png;base64,AAAA".to_string());

        assert_eq!(
            cache.get("det/E1/title_0.png").as_deref(),
            Some("data:image/png;base64,AAAA")
        );
        assert!(cache.get("det/E1/scale_0.png").is_none());
    }

    #[test]
    fn test_cache_eviction() {
        let cache = DataUrlCache::new(2);

        cache.put("a".to_string(), "1".to_string());
        cache.put("b".to_string(), "2".to_string());
        let _ = cache.get("a");
        cache.put("c".to_string(), "3".to_string());

        assert!(cache.get("a").is_some()); // recently used
        assert!(cache.get("b").is_none()); // evicted
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_cache_zero_capacity_holds_one() {
        let cache = DataUrlCache::new(0);
        cache.put("a".to_string(), "1".to_string());
        cache.put("b".to_string(), "2".to_string());
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
