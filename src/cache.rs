use std::collections::HashMap;

const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Node<V> {
    key: String,
    value: V,
    prev: usize,
    next: usize,
}

/// Bounded least-recently-used cache in front of the probability-table
/// lookups. The scoring pass re-reads the probabilities of high-frequency
/// words constantly; this keeps those hits out of the table file.
///
/// Intrusive doubly-linked list over a slab, most recent at the head. All
/// operations are O(1).
#[derive(Debug)]
pub struct LruCache<V> {
    map: HashMap<String, usize>,
    nodes: Vec<Node<V>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    capacity: usize,
}

impl<V> LruCache<V> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be positive");
        Self {
            map: HashMap::with_capacity(capacity.min(1 << 20)),
            nodes: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Looks up a key, promoting it to most recently used on a hit.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        let index = *self.map.get(key)?;
        self.unlink(index);
        self.push_front(index);
        Some(&self.nodes[index].value)
    }

    /// Inserts or replaces a value, evicting the least recently used entry
    /// when over capacity.
    pub fn insert(&mut self, key: &str, value: V) {
        if let Some(&index) = self.map.get(key) {
            self.nodes[index].value = value;
            self.unlink(index);
            self.push_front(index);
            return;
        }
        if self.map.len() >= self.capacity {
            self.evict_tail();
        }
        let node = Node {
            key: key.to_string(),
            value,
            prev: NIL,
            next: NIL,
        };
        let index = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };
        self.map.insert(key.to_string(), index);
        self.push_front(index);
    }

    fn evict_tail(&mut self) {
        let tail = self.tail;
        if tail == NIL {
            return;
        }
        self.unlink(tail);
        let key = std::mem::take(&mut self.nodes[tail].key);
        self.map.remove(&key);
        self.free.push(tail);
    }

    fn unlink(&mut self, index: usize) {
        let (prev, next) = (self.nodes[index].prev, self.nodes[index].next);
        if prev != NIL {
            self.nodes[prev].next = next;
        } else if self.head == index {
            self.head = next;
        }
        if next != NIL {
            self.nodes[next].prev = prev;
        } else if self.tail == index {
            self.tail = prev;
        }
        self.nodes[index].prev = NIL;
        self.nodes[index].next = NIL;
    }

    fn push_front(&mut self, index: usize) {
        self.nodes[index].next = self.head;
        self.nodes[index].prev = NIL;
        if self.head != NIL {
            self.nodes[self.head].prev = index;
        }
        self.head = index;
        if self.tail == NIL {
            self.tail = index;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_and_miss() {
        let mut cache = LruCache::new(4);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.get("a"), Some(&1));
        assert_eq!(cache.get("c"), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        // touch "a" so "b" is the LRU entry
        assert_eq!(cache.get("a"), Some(&1));
        cache.insert("c", 3);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(&1));
        assert_eq!(cache.get("c"), Some(&3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn reinsert_updates_value_and_recency() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 10);
        cache.insert("c", 3);
        // "b" was least recent after "a" got refreshed
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(&10));
    }

    #[test]
    fn evicted_slots_are_reused() {
        let mut cache = LruCache::new(2);
        for i in 0..100 {
            cache.insert(&format!("key{i}"), i);
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.nodes.len() <= 3);
        assert_eq!(cache.get("key99"), Some(&99));
        assert_eq!(cache.get("key98"), Some(&98));
    }

    #[test]
    fn capacity_one() {
        let mut cache = LruCache::new(1);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(&2));
    }
}
