//! Bounded FIFO cache
//!
//! Entries are evicted in insertion order once the capacity is reached.
//! Reading an entry does not refresh its position.

use std::collections::{HashMap, VecDeque};

/// A bounded map that evicts the oldest inserted key first
#[derive(Debug, Clone)]
pub struct FifoCache<V> {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, V>,
}

impl<V: Clone> FifoCache<V> {
    /// Create a cache holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert a value, returning the evicted key if the cache was full.
    ///
    /// Replacing an existing key keeps its original position.
    pub fn insert(&mut self, key: String, value: V) -> Option<String> {
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = value;
            return None;
        }

        let mut evicted = None;
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
                evicted = Some(oldest);
            }
        }

        self.order.push_back(key.clone());
        self.entries.insert(key, value);
        evicted
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let value = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(value)
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Keys from oldest to newest
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_first_inserted() {
        let mut cache = FifoCache::new(3);
        assert_eq!(cache.insert("a".into(), 1), None);
        cache.insert("b".into(), 2);
        cache.insert("c".into(), 3);

        assert_eq!(cache.insert("d".into(), 4), Some("a".to_string()));
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains("a"));
        assert_eq!(cache.keys().collect::<Vec<_>>(), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_reads_do_not_refresh_position() {
        let mut cache = FifoCache::new(2);
        cache.insert("a".into(), 1);
        cache.insert("b".into(), 2);
        assert_eq!(cache.get("a"), Some(1));

        assert_eq!(cache.insert("c".into(), 3), Some("a".to_string()));
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut cache = FifoCache::new(2);
        cache.insert("a".into(), 1);
        cache.insert("b".into(), 2);
        assert_eq!(cache.insert("a".into(), 10), None);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.insert("c".into(), 3), Some("a".to_string()));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut cache = FifoCache::new(2);
        cache.insert("a".into(), 1);
        cache.insert("b".into(), 2);
        assert_eq!(cache.remove("a"), Some(1));
        cache.insert("c".into(), 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.keys().collect::<Vec<_>>(), vec!["b", "c"]);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut cache = FifoCache::new(0);
        cache.insert("a".into(), 1);
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.len(), 1);
    }
}
