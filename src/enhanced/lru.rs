//! Bounded LRU Cache
//!
//! Fixed-capacity string-keyed store with least-recently-used eviction.
//! Nodes live in an arena threaded by a doubly-linked recency list (head is
//! most recently used, tail is least), so `get`, `insert` and `remove` are
//! O(1) amortized. Slots freed by removal are recycled through a free list.

use std::collections::HashMap;

type NodeIndex = usize;

const NIL: NodeIndex = usize::MAX;

struct Node<V> {
    key: String,
    value: V,
    prev: NodeIndex,
    next: NodeIndex,
}

/// LRU cache holding at most `capacity` entries.
pub struct LruCache<V> {
    nodes: Vec<Option<Node<V>>>,
    free: Vec<NodeIndex>,
    index: HashMap<String, NodeIndex>,
    head: NodeIndex,
    tail: NodeIndex,
    capacity: usize,
}

impl<V> LruCache<V> {
    /// Create an empty cache. A capacity of 0 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            nodes: Vec::with_capacity(capacity.min(1024)),
            free: Vec::new(),
            index: HashMap::with_capacity(capacity.min(1024)),
            head: NIL,
            tail: NIL,
            capacity,
        }
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of entries.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Whether `key` is present. Does not touch recency.
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Look up `key`, marking it most recently used on a hit.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.move_to_front(idx);
        self.nodes[idx].as_ref().map(|node| &node.value)
    }

    /// Look up `key` without touching recency.
    pub fn peek(&self, key: &str) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.nodes[idx].as_ref().map(|node| &node.value)
    }

    /// Insert or overwrite `key`, marking it most recently used.
    ///
    /// Returns the evicted least-recently-used entry when the insert pushed
    /// the cache past capacity.
    pub fn insert(&mut self, key: String, value: V) -> Option<(String, V)> {
        if let Some(&idx) = self.index.get(&key) {
            if let Some(node) = self.nodes[idx].as_mut() {
                node.value = value;
            }
            self.move_to_front(idx);
            return None;
        }

        let evicted = if self.index.len() >= self.capacity {
            self.pop_back()
        } else {
            None
        };

        let node = Node {
            key: key.clone(),
            value,
            prev: NIL,
            next: NIL,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.push_front(idx);

        evicted
    }

    /// Remove `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let idx = self.index.remove(key)?;
        self.unlink(idx);
        self.free.push(idx);
        self.nodes[idx].take().map(|node| node.value)
    }

    /// Remove every entry for which `keep` returns false. Returns how many
    /// entries were removed.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &V) -> bool) -> usize {
        let doomed: Vec<String> = self
            .nodes
            .iter()
            .flatten()
            .filter(|node| !keep(&node.key, &node.value))
            .map(|node| node.key.clone())
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.index.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while cursor != NIL {
            match self.nodes[cursor].as_ref() {
                Some(node) => {
                    keys.push(node.key.clone());
                    cursor = node.next;
                }
                None => break,
            }
        }
        keys
    }

    fn pop_back(&mut self) -> Option<(String, V)> {
        if self.tail == NIL {
            return None;
        }
        let idx = self.tail;
        self.unlink(idx);
        self.free.push(idx);
        let node = self.nodes[idx].take()?;
        self.index.remove(&node.key);
        Some((node.key, node.value))
    }

    fn move_to_front(&mut self, idx: NodeIndex) {
        if self.head == idx {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn push_front(&mut self, idx: NodeIndex) {
        let old_head = self.head;
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = NIL;
            node.next = old_head;
        }
        if old_head != NIL {
            if let Some(head) = self.nodes[old_head].as_mut() {
                head.prev = idx;
            }
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn unlink(&mut self, idx: NodeIndex) {
        let (prev, next) = match self.nodes[idx].as_ref() {
            Some(node) => (node.prev, node.next),
            None => return,
        };
        if prev != NIL {
            if let Some(node) = self.nodes[prev].as_mut() {
                node.next = next;
            }
        } else {
            self.head = next;
        }
        if next != NIL {
            if let Some(node) = self.nodes[next].as_mut() {
                node.prev = prev;
            }
        } else {
            self.tail = prev;
        }
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = NIL;
            node.next = NIL;
        }
    }
}
