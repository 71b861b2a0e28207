use std::collections::{HashSet, VecDeque};

/// Bounded window of recently seen artifact ids.
///
/// Both delivery channels feed one cache, so an artifact that arrives by
/// push and again by pull is dispatched once. Once the window is full the
/// oldest id is forgotten.
#[derive(Debug)]
pub struct SeenCache {
    window: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
    duplicates: u64,
}

impl SeenCache {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            order: VecDeque::with_capacity(window.min(10_000)),
            seen: HashSet::with_capacity(window.min(10_000)),
            duplicates: 0,
        }
    }

    /// Returns `true` the first time `id` is offered within the window
    pub fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            self.duplicates += 1;
            return false;
        }
        if self.order.len() >= self.window {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Number of offers rejected as duplicates
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_insert_wins() {
        let mut cache = SeenCache::new(10);
        assert!(cache.insert("a"));
        assert!(!cache.insert("a"));
        assert!(cache.insert("b"));
        assert_eq!(cache.duplicates(), 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_window_forgets_oldest() {
        let mut cache = SeenCache::new(2);
        cache.insert("a");
        cache.insert("b");
        cache.insert("c");
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
        assert!(cache.insert("a"));
    }
}
