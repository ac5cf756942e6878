//! Per-state order bucket.
//!
//! An insertion-ordered list of order ids with one shared traversal cursor.
//! Nodes live in a slab (`Vec<Option<Node>>` plus a free list) and link to
//! each other by slot index; an id -> slot map gives O(1) removal by
//! identity. Every operation takes the bucket's single mutex, so insert,
//! next, reset and remove are mutually exclusive.
//!
//! Cursor rules:
//! - `next` yields the node under the cursor and advances it; past the tail
//!   it yields `None` until `reset`.
//! - `insert` while the cursor is past the tail (or the bucket is empty)
//!   parks the cursor on the new node, so late arrivals are not skipped.
//! - `remove` of the node under the cursor moves the cursor to its successor.

use std::collections::HashMap;

use frb_schemas::{OrderId, OrderState};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BucketError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Clone, Copy)]
struct Node {
    id: OrderId,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Default)]
struct Slots {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    index: HashMap<OrderId, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    cursor: Option<usize>,
}

impl Slots {
    fn node(&self, slot: usize) -> Option<&Node> {
        self.nodes.get(slot).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, slot: usize) -> Option<&mut Node> {
        self.nodes.get_mut(slot).and_then(Option::as_mut)
    }

    fn alloc(&mut self, node: Node) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn id_at(&self, slot: Option<usize>) -> Option<OrderId> {
        slot.and_then(|s| self.node(s)).map(|n| n.id)
    }
}

/// Concurrent per-state collection of order ids.
#[derive(Debug)]
pub struct OrderBucket {
    state: OrderState,
    inner: Mutex<Slots>,
}

impl OrderBucket {
    pub fn new(state: OrderState) -> Self {
        Self {
            state,
            inner: Mutex::new(Slots::default()),
        }
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    /// Append `id` at the tail.
    ///
    /// # Errors
    /// `InvalidArgument` for the nil id or an id already in this bucket.
    pub fn insert(&self, id: OrderId) -> Result<(), BucketError> {
        if id.is_nil() {
            return Err(BucketError::InvalidArgument(
                "cannot insert the nil order id".to_string(),
            ));
        }

        let mut g = self.inner.lock();
        if g.index.contains_key(&id) {
            return Err(BucketError::InvalidArgument(format!(
                "order {id} already in {} bucket",
                self.state
            )));
        }

        let old_tail = g.tail;
        let slot = g.alloc(Node {
            id,
            prev: old_tail,
            next: None,
        });
        match old_tail.and_then(|t| g.node_mut(t)) {
            Some(t) => t.next = Some(slot),
            None => g.head = Some(slot),
        }
        g.tail = Some(slot);
        if g.cursor.is_none() {
            g.cursor = Some(slot);
        }
        g.index.insert(id, slot);
        Ok(())
    }

    /// Yield the id under the cursor and advance. `None` once past the tail.
    pub fn next(&self) -> Option<OrderId> {
        let mut g = self.inner.lock();
        let slot = g.cursor?;
        let node = *g.node(slot)?;
        g.cursor = node.next;
        Some(node.id)
    }

    /// Move the cursor back to the head.
    pub fn reset(&self) {
        let mut g = self.inner.lock();
        g.cursor = g.head;
    }

    /// Remove `id` by identity. Returns `false` (and changes nothing) if the
    /// id is not in this bucket.
    pub fn remove(&self, id: OrderId) -> bool {
        let mut g = self.inner.lock();
        let Some(slot) = g.index.remove(&id) else {
            return false;
        };
        let Some(node) = g.nodes.get_mut(slot).and_then(Option::take) else {
            return false;
        };

        if g.cursor == Some(slot) {
            g.cursor = node.next;
        }
        match node.prev.and_then(|p| g.node_mut(p)) {
            Some(p) => p.next = node.next,
            None => g.head = node.next,
        }
        match node.next.and_then(|n| g.node_mut(n)) {
            Some(n) => n.prev = node.prev,
            None => g.tail = node.prev,
        }
        g.free.push(slot);
        true
    }

    pub fn contains(&self, id: OrderId) -> bool {
        self.inner.lock().index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn head(&self) -> Option<OrderId> {
        let g = self.inner.lock();
        g.id_at(g.head)
    }

    pub fn tail(&self) -> Option<OrderId> {
        let g = self.inner.lock();
        g.id_at(g.tail)
    }

    /// The id `next` would yield, without advancing.
    pub fn cursor(&self) -> Option<OrderId> {
        let g = self.inner.lock();
        g.id_at(g.cursor)
    }

    /// Ids head to tail.
    pub fn snapshot(&self) -> Vec<OrderId> {
        let g = self.inner.lock();
        let mut out = Vec::with_capacity(g.index.len());
        let mut at = g.head;
        while let Some(node) = at.and_then(|s| g.node(s)) {
            out.push(node.id);
            at = node.next;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<OrderId> {
        (0..n).map(|_| OrderId::new()).collect()
    }

    fn filled(ids: &[OrderId]) -> OrderBucket {
        let b = OrderBucket::new(OrderState::Open);
        for id in ids {
            b.insert(*id).unwrap();
        }
        b
    }

    fn drain(b: &OrderBucket) -> Vec<OrderId> {
        std::iter::from_fn(|| b.next()).collect()
    }

    #[test]
    fn next_walks_in_insertion_order_then_stops() {
        let v = ids(3);
        let b = filled(&v);
        assert_eq!(drain(&b), v);
        assert_eq!(b.next(), None);
        assert_eq!(b.next(), None, "no wrap-around without reset");
        b.reset();
        assert_eq!(drain(&b), v);
    }

    #[test]
    fn nil_and_duplicate_inserts_are_rejected() {
        let b = OrderBucket::new(OrderState::Open);
        let nil = OrderId::from_uuid(uuid::Uuid::nil());
        assert!(matches!(b.insert(nil), Err(BucketError::InvalidArgument(_))));

        let id = OrderId::new();
        b.insert(id).unwrap();
        assert!(matches!(b.insert(id), Err(BucketError::InvalidArgument(_))));
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn insert_after_exhaustion_is_yielded() {
        let v = ids(2);
        let b = filled(&v);
        assert_eq!(drain(&b).len(), 2);
        let late = OrderId::new();
        b.insert(late).unwrap();
        assert_eq!(b.next(), Some(late));
        assert_eq!(b.next(), None);
    }

    #[test]
    fn removing_cursor_node_advances_cursor() {
        let v = ids(3);
        let b = filled(&v);
        assert_eq!(b.next(), Some(v[0]));
        assert_eq!(b.cursor(), Some(v[1]));
        assert!(b.remove(v[1]));
        assert_eq!(b.cursor(), Some(v[2]));
        assert_eq!(b.next(), Some(v[2]));
    }

    #[test]
    fn removing_cursor_tail_exhausts() {
        let v = ids(2);
        let b = filled(&v);
        b.next();
        assert!(b.remove(v[1]));
        assert_eq!(b.next(), None);
        assert_eq!(b.tail(), Some(v[0]));
    }

    #[test]
    fn removing_only_element_clears_everything() {
        let v = ids(1);
        let b = filled(&v);
        assert!(b.remove(v[0]));
        assert!(b.is_empty());
        assert_eq!(b.head(), None);
        assert_eq!(b.tail(), None);
        assert_eq!(b.cursor(), None);
    }

    #[test]
    fn head_and_tail_follow_boundary_removals() {
        let v = ids(3);
        let b = filled(&v);
        assert!(b.remove(v[0]));
        assert_eq!(b.head(), Some(v[1]));
        assert!(b.remove(v[2]));
        assert_eq!(b.tail(), Some(v[1]));
        assert_eq!(b.snapshot(), vec![v[1]]);
    }

    #[test]
    fn removing_absent_id_is_a_no_op() {
        let v = ids(2);
        let b = filled(&v);
        assert!(!b.remove(OrderId::new()));
        assert_eq!(b.snapshot(), v);
        assert!(b.remove(v[0]));
        assert!(!b.remove(v[0]), "second removal finds nothing");
    }

    #[test]
    fn freed_slots_are_reused_without_corrupting_links() {
        let v = ids(4);
        let b = filled(&v);
        b.remove(v[1]);
        b.remove(v[2]);
        let w = ids(2);
        b.insert(w[0]).unwrap();
        b.insert(w[1]).unwrap();
        assert_eq!(b.snapshot(), vec![v[0], v[3], w[0], w[1]]);
        b.reset();
        assert_eq!(drain(&b), vec![v[0], v[3], w[0], w[1]]);
    }

    #[test]
    fn concurrent_traversal_and_removal_never_yields_removed_ids() {
        use std::sync::Arc;
        use std::thread;

        let v = ids(2_000);
        let b = Arc::new(filled(&v));

        // Remove every even-indexed order from another thread while this
        // thread drains the cursor.
        let evens: Vec<OrderId> = v.iter().step_by(2).copied().collect();
        let remover = {
            let b = Arc::clone(&b);
            let evens = evens.clone();
            thread::spawn(move || {
                for id in evens {
                    assert!(b.remove(id));
                }
            })
        };

        let mut seen = Vec::new();
        while let Some(id) = b.next() {
            seen.push(id);
        }
        remover.join().unwrap();

        // Whatever was yielded appears in insertion order.
        let pos: HashMap<OrderId, usize> = v.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        assert!(seen.windows(2).all(|w| pos[&w[0]] < pos[&w[1]]));

        // Every odd order survives and is yielded after a reset.
        b.reset();
        let rest: Vec<OrderId> = std::iter::from_fn(|| b.next()).collect();
        let odds: Vec<OrderId> = v.iter().skip(1).step_by(2).copied().collect();
        assert_eq!(rest, odds);
        assert_eq!(b.len(), 1_000);
    }
}
