// Indexed FIFO for riders on course
//
// Entries live in an arena of slots linked in insertion order. A key to slot
// map gives O(1) lookup and O(1) removal from anywhere in the queue, which a
// manual DNF of a rider in the middle of the course needs.

use ahash::AHashMap;
use std::hash::Hash;

#[derive(Debug, Clone)]
struct Slot<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// FIFO queue with unique keys and removal by key
#[derive(Debug, Clone)]
pub struct IndexedQueue<K, V> {
    /// Arena of entries, `None` for free slots
    slots: Vec<Option<Slot<K, V>>>,
    /// Free slot indices available for reuse
    free: Vec<usize>,
    /// Key to slot index
    index: AHashMap<K, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K, V> Default for IndexedQueue<K, V> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: AHashMap::default(),
            head: None,
            tail: None,
        }
    }
}

impl<K: Eq + Hash + Clone, V> IndexedQueue<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let at = *self.index.get(key)?;
        self.slot(at).map(|s| &s.value)
    }

    /// Oldest entry
    pub fn front(&self) -> Option<(&K, &V)> {
        self.slot(self.head?).map(|s| (&s.key, &s.value))
    }

    /// Append an entry; returns false and leaves the queue unchanged if the key is present
    pub fn push_back(&mut self, key: K, value: V) -> bool {
        if self.index.contains_key(&key) {
            return false;
        }

        let slot = Slot {
            key: key.clone(),
            value,
            prev: self.tail,
            next: None,
        };
        let at = match self.free.pop() {
            Some(at) => {
                self.slots[at] = Some(slot);
                at
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };

        match self.tail {
            Some(tail) => {
                if let Some(prev) = self.slot_mut(tail) {
                    prev.next = Some(at);
                }
            }
            None => self.head = Some(at),
        }
        self.tail = Some(at);
        self.index.insert(key, at);
        true
    }

    /// Remove and return the oldest entry
    pub fn pop_front(&mut self) -> Option<(K, V)> {
        let head = self.head?;
        self.unlink(head)
    }

    /// Remove an entry by key wherever it is in the queue
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let at = *self.index.get(key)?;
        self.unlink(at).map(|(_, value)| value)
    }

    /// Iterate from oldest to newest
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            queue: self,
            cursor: self.head,
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
    }

    fn slot(&self, at: usize) -> Option<&Slot<K, V>> {
        self.slots.get(at).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, at: usize) -> Option<&mut Slot<K, V>> {
        self.slots.get_mut(at).and_then(Option::as_mut)
    }

    fn unlink(&mut self, at: usize) -> Option<(K, V)> {
        let slot = self.slots.get_mut(at)?.take()?;

        match slot.prev {
            Some(prev) => {
                if let Some(s) = self.slot_mut(prev) {
                    s.next = slot.next;
                }
            }
            None => self.head = slot.next,
        }
        match slot.next {
            Some(next) => {
                if let Some(s) = self.slot_mut(next) {
                    s.prev = slot.prev;
                }
            }
            None => self.tail = slot.prev,
        }

        self.index.remove(&slot.key);
        self.free.push(at);
        Some((slot.key, slot.value))
    }
}

/// Iterator over an `IndexedQueue` in FIFO order
pub struct Iter<'a, K, V> {
    queue: &'a IndexedQueue<K, V>,
    cursor: Option<usize>,
}

impl<'a, K: Eq + Hash + Clone, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.queue.slot(self.cursor?)?;
        self.cursor = slot.next;
        Some((&slot.key, &slot.value))
    }
}
