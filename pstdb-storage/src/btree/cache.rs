use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Bounded cache of decoded pages, evicted in insertion order.
pub struct PageCache<H, P> {
    pages: HashMap<H, P>,
    order: VecDeque<H>,
    capacity: usize,
}

impl<H: Copy + Eq + Hash, P> PageCache<H, P> {
    /// Create a cache. Zero capacity disables caching.
    #[inline]
    pub fn new(capacity: usize) -> Self {
        PageCache {
            pages: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    #[inline]
    pub fn get(&self, handle: &H) -> Option<&P> {
        self.pages.get(handle)
    }

    /// Cache a page, replacing any page cached under the same handle.
    #[inline]
    pub fn insert(&mut self, handle: H, page: P) {
        if self.capacity == 0 {
            return;
        }
        if let Some(cached) = self.pages.get_mut(&handle) {
            *cached = page;
            return;
        }
        while self.pages.len() >= self.capacity {
            match self.order.pop_front() {
                Some(old) => {
                    self.pages.remove(&old);
                }
                None => break,
            }
        }
        self.order.push_back(handle);
        self.pages.insert(handle, page);
    }

    #[inline]
    pub fn remove(&mut self, handle: &H) {
        if self.pages.remove(handle).is_some() {
            self.order.retain(|h| h != handle);
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        self.pages.clear();
        self.order.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_cache_eviction() {
        let mut cache: PageCache<u64, &str> = PageCache::new(2);
        cache.insert(4, "a");
        cache.insert(8, "b");
        cache.insert(12, "c");
        assert!(cache.get(&4).is_none());
        assert_eq!(cache.get(&8), Some(&"b"));
        cache.remove(&8);
        assert_eq!(cache.len(), 1);
        cache.insert(16, "d");
        cache.insert(12, "c2");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&12), Some(&"c2"));
        cache.clear();
        assert!(cache.is_empty());

        let mut disabled: PageCache<u64, &str> = PageCache::new(0);
        disabled.insert(4, "a");
        assert!(disabled.is_empty());
    }
}
