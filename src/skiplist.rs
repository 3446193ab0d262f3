//! Probabilistic skip list keyed by string, ordered lexicographically.
//!
//! This is the memtable's backing structure. Each node carries a tower of
//! forward pointers; a node present at level `i` is present at every level
//! below it, and level 0 links every node in strictly increasing key order.
//! New nodes are promoted one level with probability 1/4, giving the usual
//! O(log n) expected search and insert cost.
//!
//! The list is deliberately not internally synchronized: the database facade
//! guarantees a single writer, and frozen memtables are read-only.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::ptr::NonNull;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// A stored value. `None` marks a deletion (tombstone).
pub type Value = Option<Vec<u8>>;

const MAX_HEIGHT: usize = 16;
const P: f64 = 0.25;

pub struct SkipList {
    /// Sentinel node with the empty key, anchoring every level.
    head: Box<Node>,
    height: usize,
    len: usize,
    /// Seeded once at construction; reseeding per insert would dominate the
    /// cost of small writes.
    rng: SmallRng,
}

struct Node {
    key: String,
    value: Value,
    /// `forward[i]` is the next node at level `i`. The vector's length is
    /// the number of levels this node participates in.
    forward: Vec<Option<NonNull<Node>>>,
}

impl SkipList {
    pub fn new() -> Self {
        Self {
            head: Box::new(Node {
                key: String::new(),
                value: None,
                forward: vec![None; MAX_HEIGHT],
            }),
            height: 1,
            len: 0,
            rng: SmallRng::from_entropy(),
        }
    }

    /// Returns the value stored under `key`, tombstones included.
    pub fn search(&self, key: &str) -> Option<&Value> {
        let mut cur: *const Node = &*self.head;
        for level in (0..self.height).rev() {
            unsafe {
                while let Some(next) = (&(*cur).forward)[level] {
                    match (*next.as_ptr()).key.as_str().cmp(key) {
                        Ordering::Less => cur = next.as_ptr(),
                        Ordering::Equal => return Some(&(*next.as_ptr()).value),
                        Ordering::Greater => break,
                    }
                }
            }
        }
        None
    }

    /// Inserts `key`, or overwrites the existing node's value in place.
    pub fn upsert(&mut self, key: String, value: Value) {
        let head: *mut Node = &mut *self.head;
        // The last node visited at each level; these become the splice
        // anchors for the new node's tower.
        let mut update: [*mut Node; MAX_HEIGHT] = [head; MAX_HEIGHT];

        let mut cur = head;
        for level in (0..self.height).rev() {
            unsafe {
                while let Some(next) = (&(*cur).forward)[level] {
                    match (*next.as_ptr()).key.as_str().cmp(&key) {
                        Ordering::Less => cur = next.as_ptr(),
                        Ordering::Equal => {
                            (*next.as_ptr()).value = value;
                            return;
                        }
                        Ordering::Greater => break,
                    }
                }
            }
            update[level] = cur;
        }

        let level = self.random_level();
        if level > self.height {
            // Anchors above the old height stay at the head, which `update`
            // was initialized with.
            self.height = level;
        }

        let node = NonNull::from(Box::leak(Box::new(Node {
            key,
            value,
            forward: vec![None; level],
        })));
        for (i, anchor) in update.iter().take(level).enumerate() {
            unsafe {
                (&mut (*node.as_ptr()).forward)[i] = (&(**anchor).forward)[i];
                (&mut (**anchor).forward)[i] = Some(node);
            }
        }
        self.len += 1;
    }

    /// Number of entries (tombstones included).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Walks level 0, yielding entries in ascending key order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            next: self.head.forward[0],
            _marker: PhantomData,
        }
    }

    /// Samples the number of levels for a new node: geometric with success
    /// probability `P`, capped at `MAX_HEIGHT`.
    fn random_level(&mut self) -> usize {
        let mut level = 1;
        while level < MAX_HEIGHT && self.rng.gen_bool(P) {
            level += 1;
        }
        level
    }
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SkipList {
    fn drop(&mut self) {
        let mut cur = self.head.forward[0];
        while let Some(node) = cur {
            unsafe {
                let next = (&(*node.as_ptr()).forward)[0];
                drop(Box::from_raw(node.as_ptr()));
                cur = next;
            }
        }
    }
}

// Nodes are reachable only through the list, and mutation requires `&mut`,
// so shared references can only read.
unsafe impl Send for SkipList {}
unsafe impl Sync for SkipList {}

pub struct Iter<'a> {
    next: Option<NonNull<Node>>,
    _marker: PhantomData<&'a SkipList>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, &'a Value);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next?;
        let node: &'a Node = unsafe { &*node.as_ptr() };
        self.next = node.forward[0];
        Some((node.key.as_str(), &node.value))
    }
}
