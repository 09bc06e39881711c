//! Recency order over keys.
//!
//! An index-linked list stored in a vector plus a key → slot map. `touch`
//! moves a key to the most-recent end; eviction walks from the least-recent
//! end.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone)]
struct Link<K> {
    key: K,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct LruOrder<K> {
    links: Vec<Option<Link<K>>>,
    slots: HashMap<K, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    vacant: Vec<usize>,
}

impl<K: Clone + Eq + Hash> Default for LruOrder<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + Eq + Hash> LruOrder<K> {
    pub fn new() -> Self {
        Self {
            links: Vec::new(),
            slots: HashMap::new(),
            head: None,
            tail: None,
            vacant: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    /// Mark `key` as most recently used, inserting it if absent.
    pub fn touch(&mut self, key: K) {
        if let Some(&slot) = self.slots.get(&key) {
            self.unlink(slot);
            self.link_back(slot);
            return;
        }
        let link = Link {
            key: key.clone(),
            prev: None,
            next: None,
        };
        let slot = match self.vacant.pop() {
            Some(slot) => {
                self.links[slot] = Some(link);
                slot
            }
            None => {
                self.links.push(Some(link));
                self.links.len() - 1
            }
        };
        self.slots.insert(key, slot);
        self.link_back(slot);
    }

    /// Move `key` to the least-recent end so it is considered first for
    /// eviction.
    pub fn demote(&mut self, key: &K) {
        if let Some(&slot) = self.slots.get(key) {
            self.unlink(slot);
            self.link_front(slot);
        }
    }

    pub fn remove(&mut self, key: &K) -> bool {
        let Some(slot) = self.slots.remove(key) else {
            return false;
        };
        self.unlink(slot);
        self.links[slot] = None;
        self.vacant.push(slot);
        true
    }

    pub fn least_recently_used(&self) -> Option<&K> {
        self.head
            .and_then(|slot| self.links[slot].as_ref())
            .map(|link| &link.key)
    }

    /// Keys from least to most recently used.
    pub fn iter(&self) -> impl Iterator<Item = &K> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let link = self.links[cursor?].as_ref()?;
            cursor = link.next;
            Some(&link.key)
        })
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = match &self.links[slot] {
            Some(link) => (link.prev, link.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(link) = self.links[p].as_mut() {
                    link.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(link) = self.links[n].as_mut() {
                    link.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(link) = self.links[slot].as_mut() {
            link.prev = None;
            link.next = None;
        }
    }

    fn link_back(&mut self, slot: usize) {
        if let Some(link) = self.links[slot].as_mut() {
            link.prev = self.tail;
            link.next = None;
        }
        match self.tail {
            Some(t) => {
                if let Some(link) = self.links[t].as_mut() {
                    link.next = Some(slot);
                }
            }
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
    }

    fn link_front(&mut self, slot: usize) {
        if let Some(link) = self.links[slot].as_mut() {
            link.prev = None;
            link.next = self.head;
        }
        match self.head {
            Some(h) => {
                if let Some(link) = self.links[h].as_mut() {
                    link.prev = Some(slot);
                }
            }
            None => self.tail = Some(slot),
        }
        self.head = Some(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::LruOrder;

    fn order(lru: &LruOrder<&'static str>) -> Vec<&'static str> {
        lru.iter().copied().collect()
    }

    #[test]
    fn touch_moves_to_most_recent_end() {
        let mut lru = LruOrder::new();
        lru.touch("a");
        lru.touch("b");
        lru.touch("c");
        lru.touch("a");
        assert_eq!(order(&lru), vec!["b", "c", "a"]);
        assert_eq!(lru.least_recently_used(), Some(&"b"));
    }

    #[test]
    fn remove_unlinks_and_reuses_slots() {
        let mut lru = LruOrder::new();
        lru.touch("a");
        lru.touch("b");
        lru.touch("c");
        assert!(lru.remove(&"b"));
        assert!(!lru.remove(&"b"));
        assert_eq!(order(&lru), vec!["a", "c"]);
        lru.touch("d");
        assert_eq!(order(&lru), vec!["a", "c", "d"]);
        assert_eq!(lru.len(), 3);
    }

    #[test]
    fn demote_moves_to_least_recent_end() {
        let mut lru = LruOrder::new();
        lru.touch("a");
        lru.touch("b");
        lru.touch("c");
        lru.demote(&"c");
        assert_eq!(order(&lru), vec!["c", "a", "b"]);
        assert!(lru.remove(&"c"));
        assert!(lru.remove(&"a"));
        assert!(lru.remove(&"b"));
        assert!(lru.is_empty());
        assert_eq!(lru.least_recently_used(), None);
    }
}
