// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Circular doubly-linked rings with a self-root invariant, stored in an
//! arena of index-addressed nodes.
//!
//! A ring is identified by its **root** node. Every node carries a `root`
//! field: a detached node is its own root (a one-element ring), and every
//! node linked into a ring shares the ring's root. The ring is circular in
//! both directions and includes the root, so forward traversal from the root
//! returns to the root.
//!
//! One [`Arena`] can hold any number of rings, and nodes can move between
//! rings in the same arena ([`Arena::cut`], [`Arena::splice`]). All
//! operations are O(1) except the ones that must rebase `root` fields
//! (`cut`, `splice`, `reroot`, replacing a root), which are O(length of the
//! moved segment), and [`Arena::audit`].
//!
//! # Node identity
//!
//! [`NodeId`]s are stable for the life of the node. Passing a finalized
//! (freed) id to any operation panics; ids are not ABA-protected, so hold
//! them only as long as the node lives.

use std::ops::ControlFlow;

/// Identifies a node within its [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Link {
    prev: NodeId,
    next: NodeId,
    root: NodeId,
}

#[derive(Debug)]
enum Entry<T> {
    Vacant,
    Node { link: Link, data: Option<T> },
}

/// Ring audit failures. See [`Arena::audit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuditError {
    /// A reachable node's `root` does not match the ring's root.
    #[error("node {node} does not share the ring root {root}")]
    MismatchedRoot { node: NodeId, root: NodeId },

    /// `prev`/`next` are not mutually consistent at this node.
    #[error("link inconsistency at node {node}")]
    BrokenLink { node: NodeId },

    /// Forward traversal did not return to the root within the arena size.
    #[error("ring rooted at {root} does not close")]
    NotClosed { root: NodeId },
}

/// An arena of ring nodes. See the [module docs](self).
#[derive(Debug)]
pub struct Arena<T> {
    entries: Vec<Entry<T>>,
    vacant: Vec<u32>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self { Self::new() }
}

impl<T> Arena<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            vacant: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            vacant: Vec::new(),
        }
    }

    fn link(&self, id: NodeId) -> &Link {
        match &self.entries[id.0 as usize] {
            Entry::Node { link, .. } => link,
            Entry::Vacant => panic!("ring: stale node id {id}"),
        }
    }

    fn link_mut(&mut self, id: NodeId) -> &mut Link {
        match &mut self.entries[id.0 as usize] {
            Entry::Node { link, .. } => link,
            Entry::Vacant => panic!("ring: stale node id {id}"),
        }
    }

    fn allocate(&mut self, data: Option<T>) -> NodeId {
        let id = match self.vacant.pop() {
            Some(index) => NodeId(index),
            None => {
                let index = u32::try_from(self.entries.len()).expect("ring: arena exhausted");
                self.entries.push(Entry::Vacant);
                NodeId(index)
            }
        };
        self.entries[id.0 as usize] = Entry::Node {
            link: Link {
                prev: id,
                next: id,
                root: id,
            },
            data,
        };
        id
    }

    /// Creates an empty ring and returns its root.
    pub fn ring(&mut self) -> NodeId { self.allocate(None) }

    /// Creates a detached (self-rooted) node carrying `data`.
    pub fn node(&mut self, data: T) -> NodeId { self.allocate(Some(data)) }

    /// Unlinks the node from its ring and frees its slot, returning the data.
    pub fn fini(&mut self, id: NodeId) -> Option<T> {
        self.remove(id);
        let entry = std::mem::replace(&mut self.entries[id.0 as usize], Entry::Vacant);
        self.vacant.push(id.0);
        match entry {
            Entry::Node { data, .. } => data,
            Entry::Vacant => panic!("ring: stale node id {id}"),
        }
    }

    /// The number of live (non-vacant) nodes across all rings.
    #[must_use]
    pub fn live(&self) -> usize { self.entries.len() - self.vacant.len() }

    // ─── Accessors ──────────────────────────────────────────────────────

    #[must_use]
    pub fn data(&self, id: NodeId) -> Option<&T> {
        match &self.entries[id.0 as usize] {
            Entry::Node { data, .. } => data.as_ref(),
            Entry::Vacant => panic!("ring: stale node id {id}"),
        }
    }

    #[must_use]
    pub fn data_mut(&mut self, id: NodeId) -> Option<&mut T> {
        match &mut self.entries[id.0 as usize] {
            Entry::Node { data, .. } => data.as_mut(),
            Entry::Vacant => panic!("ring: stale node id {id}"),
        }
    }

    /// Replaces the node's data attachment, returning the previous one.
    pub fn set_data(&mut self, id: NodeId, value: T) -> Option<T> {
        match &mut self.entries[id.0 as usize] {
            Entry::Node { data, .. } => data.replace(value),
            Entry::Vacant => panic!("ring: stale node id {id}"),
        }
    }

    /// The root of the ring this node is on (itself, when detached).
    #[must_use]
    pub fn root_of(&self, id: NodeId) -> NodeId { self.link(id).root }

    /// Whether this node is its own root.
    #[must_use]
    pub fn is_self_rooted(&self, id: NodeId) -> bool { self.link(id).root == id }

    /// Whether the ring rooted at `root` has no members.
    #[must_use]
    pub fn is_empty(&self, root: NodeId) -> bool {
        let link = self.link(root);
        link.next == root && link.prev == root
    }

    /// Whether `node` is a member (not the root) of the ring rooted at `root`.
    #[must_use]
    pub fn is_member(&self, root: NodeId, node: NodeId) -> bool {
        node != root && self.link(node).root == root
    }

    /// The next node in ring order. Steps onto the root when `id` is the
    /// last member.
    #[must_use]
    pub fn next(&self, id: NodeId) -> NodeId { self.link(id).next }

    /// The previous node in ring order. Steps onto the root when `id` is the
    /// first member.
    #[must_use]
    pub fn prev(&self, id: NodeId) -> NodeId { self.link(id).prev }

    /// The first member of the ring, or `None` when empty.
    #[must_use]
    pub fn head(&self, root: NodeId) -> Option<NodeId> {
        let next = self.link(root).next;
        (next != root).then_some(next)
    }

    /// The last member of the ring, or `None` when empty.
    #[must_use]
    pub fn tail(&self, root: NodeId) -> Option<NodeId> {
        let prev = self.link(root).prev;
        (prev != root).then_some(prev)
    }

    /// Iterates the members of the ring rooted at `root`, in ring order,
    /// excluding the root itself.
    pub fn iter(&self, root: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut cursor = self.link(root).next;
        std::iter::from_fn(move || {
            if cursor == root {
                None
            } else {
                let id = cursor;
                cursor = self.link(cursor).next;
                Some(id)
            }
        })
    }

    /// The number of members of the ring rooted at `root`. O(n).
    #[must_use]
    pub fn len(&self, root: NodeId) -> usize { self.iter(root).count() }

    // ─── Structural operations ──────────────────────────────────────────

    fn unlink(&mut self, id: NodeId) {
        let Link { prev, next, .. } = *self.link(id);
        if prev == id && next == id {
            return;
        }
        self.link_mut(prev).next = next;
        self.link_mut(next).prev = prev;
        *self.link_mut(id) = Link {
            prev: id,
            next: id,
            root: id,
        };
    }

    /// Links `node` immediately after `after`, detaching it from any ring it
    /// was previously on. `node` joins `after`'s ring (it inherits `after`'s
    /// root).
    pub fn insert(&mut self, after: NodeId, node: NodeId) {
        assert_ne!(after, node, "ring: cannot insert a node after itself");
        self.unlink(node);
        let root = self.link(after).root;
        let next = self.link(after).next;
        *self.link_mut(node) = Link {
            prev: after,
            next,
            root,
        };
        self.link_mut(after).next = node;
        self.link_mut(next).prev = node;
    }

    /// Unlinks `node` from its ring, leaving it detached (self-rooted).
    /// Detached nodes are left unchanged. Removing a non-empty ring's root
    /// orphans its members; [`Arena::audit`] detects that.
    ///
    /// Returns `node` for call chaining.
    pub fn remove(&mut self, node: NodeId) -> NodeId {
        self.unlink(node);
        node
    }

    /// Stack discipline: links `node` as the first member.
    pub fn push(&mut self, root: NodeId, node: NodeId) { self.insert(root, node); }

    /// Stack discipline: unlinks and returns the first member.
    pub fn pop(&mut self, root: NodeId) -> Option<NodeId> {
        self.head(root).map(|head| self.remove(head))
    }

    /// Queue discipline: links `node` as the last member.
    pub fn enqueue(&mut self, root: NodeId, node: NodeId) {
        let tail = self.link(root).prev;
        self.insert(tail, node);
    }

    /// Queue discipline: unlinks and returns the first member.
    pub fn dequeue(&mut self, root: NodeId) -> Option<NodeId> { self.pop(root) }

    /// Puts `new` in `old`'s position on `old`'s ring; `old` is left
    /// detached. When `old` is a ring's root, `new` becomes the root and
    /// every member is rebased onto it (O(n)).
    pub fn replace(&mut self, old: NodeId, new: NodeId) {
        assert_ne!(old, new, "ring: cannot replace a node with itself");
        self.unlink(new);
        if self.is_self_rooted(old) && self.is_empty(old) {
            return; // Nothing to take over.
        }
        let was_root = self.is_self_rooted(old);
        let prev = self.link(old).prev;
        self.insert(prev, new);
        self.unlink(old);
        if was_root {
            self.reroot(new);
        }
    }

    /// Makes `node` the root of its ring, rebasing every node on the ring
    /// (including the old root) onto it. O(n).
    pub fn reroot(&mut self, node: NodeId) {
        let mut cursor = node;
        loop {
            self.link_mut(cursor).root = node;
            cursor = self.link(cursor).next;
            if cursor == node {
                break;
            }
        }
    }

    /// Excises the contiguous segment `[from..=to]` (in ring order) from its
    /// ring and rebases it as a new ring rooted at `from`. The segment must
    /// not contain its ring's root. `from == to` cuts a single node.
    ///
    /// Returns the new root, `from`.
    pub fn cut(&mut self, from: NodeId, to: NodeId) -> NodeId {
        let before = self.link(from).prev;
        let after = self.link(to).next;
        self.link_mut(before).next = after;
        self.link_mut(after).prev = before;
        self.link_mut(to).next = from;
        self.link_mut(from).prev = to;
        self.reroot(from);
        from
    }

    /// Grafts the entire ring rooted at `donor` (the donor root included)
    /// into `at`'s ring, immediately before `at`. Every moved node is rebased
    /// onto `at`'s root. The inverse of [`Arena::cut`].
    pub fn splice(&mut self, at: NodeId, donor: NodeId) {
        assert_ne!(at, donor, "ring: cannot splice a ring into itself");
        let root = self.link(at).root;
        let first = donor;
        let last = self.link(donor).prev;
        let before = self.link(at).prev;
        self.link_mut(before).next = first;
        self.link_mut(first).prev = before;
        self.link_mut(last).next = at;
        self.link_mut(at).prev = last;
        let mut cursor = first;
        loop {
            self.link_mut(cursor).root = root;
            if cursor == last {
                break;
            }
            cursor = self.link(cursor).next;
        }
    }

    /// Walks forward from `start` (inclusive), applying `functor` to each
    /// visited node until it breaks; returns the node it broke on, or the
    /// ring's root after a full circumnavigation. Pass
    /// `start = arena.next(root)` to keep the root out of the walk until
    /// nothing matched.
    pub fn apply<F>(&self, start: NodeId, mut functor: F) -> NodeId
    where
        F: FnMut(NodeId, Option<&T>) -> ControlFlow<()>,
    {
        let mut cursor = start;
        loop {
            if functor(cursor, self.data(cursor)).is_break() {
                return cursor;
            }
            cursor = self.link(cursor).next;
            if cursor == start {
                return self.root_of(start);
            }
        }
    }

    /// Verifies the ring invariants for the ring rooted at `root`: mutual
    /// `prev`/`next` consistency, shared root, and closure within the arena
    /// size.
    pub fn audit(&self, root: NodeId) -> Result<(), AuditError> {
        if self.link(root).root != root {
            return Err(AuditError::MismatchedRoot { node: root, root });
        }
        let mut cursor = root;
        for _ in 0..=self.entries.len() {
            let link = *self.link(cursor);
            if cursor != root && link.root != root {
                return Err(AuditError::MismatchedRoot { node: cursor, root });
            }
            if self.link(link.next).prev != cursor || self.link(link.prev).next != cursor {
                return Err(AuditError::BrokenLink { node: cursor });
            }
            cursor = link.next;
            if cursor == root {
                return Ok(());
            }
        }
        Err(AuditError::NotClosed { root })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn collect_forward(arena: &Arena<i32>, root: NodeId) -> Vec<NodeId> {
        arena.iter(root).collect()
    }

    fn collect_reverse(arena: &Arena<i32>, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cursor = arena.prev(root);
        while cursor != root {
            out.push(cursor);
            cursor = arena.prev(cursor);
        }
        out
    }

    #[test]
    fn test_new_node_is_a_one_element_ring() {
        let mut arena = Arena::new();
        let n = arena.node(7);
        assert!(arena.is_self_rooted(n));
        assert!(arena.is_empty(n));
        assert_eq!(arena.next(n), n);
        assert_eq!(arena.prev(n), n);
        assert_eq!(arena.root_of(n), n);
        arena.audit(n).unwrap();
    }

    #[test]
    fn test_traversal_orders() {
        let mut arena = Arena::new();
        let root = arena.ring();
        let n0 = arena.node(0);
        let n1 = arena.node(1);
        let n2 = arena.node(2);
        arena.enqueue(root, n0);
        arena.enqueue(root, n1);
        arena.enqueue(root, n2);

        assert_eq!(collect_forward(&arena, root), vec![n0, n1, n2]);
        assert_eq!(collect_reverse(&arena, root), vec![n2, n1, n0]);
        arena.audit(root).unwrap();

        arena.remove(n1);
        assert_eq!(collect_forward(&arena, root), vec![n0, n2]);
        assert_eq!(collect_reverse(&arena, root), vec![n2, n0]);
        assert!(arena.is_self_rooted(n1));
        arena.audit(root).unwrap();
        arena.audit(n1).unwrap();
    }

    #[test]
    fn test_every_member_shares_the_root() {
        let mut arena = Arena::new();
        let root = arena.ring();
        for value in 0..8 {
            let n = arena.node(value);
            arena.enqueue(root, n);
        }
        for id in collect_forward(&arena, root) {
            assert_eq!(arena.root_of(id), root);
            assert!(arena.is_member(root, id));
        }
    }

    #[test]
    fn test_insert_then_remove_restores_the_ring() {
        let mut arena = Arena::new();
        let root = arena.ring();
        let a = arena.node(1);
        let b = arena.node(2);
        arena.enqueue(root, a);
        arena.enqueue(root, b);
        let before = collect_forward(&arena, root);

        let n = arena.node(3);
        arena.insert(a, n);
        assert_eq!(collect_forward(&arena, root), vec![a, n, b]);
        arena.remove(n);
        assert_eq!(collect_forward(&arena, root), before);
    }

    #[test]
    fn test_push_pop_is_lifo_and_enqueue_dequeue_is_fifo() {
        let mut arena = Arena::new();
        let stack = arena.ring();
        let queue = arena.ring();
        let ids: Vec<_> = (0..3).map(|v| arena.node(v)).collect();

        for &id in &ids {
            arena.push(stack, id);
        }
        assert_eq!(arena.pop(stack), Some(ids[2]));
        assert_eq!(arena.pop(stack), Some(ids[1]));
        assert_eq!(arena.pop(stack), Some(ids[0]));
        assert_eq!(arena.pop(stack), None);

        for &id in &ids {
            arena.enqueue(queue, id);
        }
        assert_eq!(arena.dequeue(queue), Some(ids[0]));
        assert_eq!(arena.dequeue(queue), Some(ids[1]));
        assert_eq!(arena.dequeue(queue), Some(ids[2]));
        assert_eq!(arena.dequeue(queue), None);
    }

    #[test]
    fn test_removing_the_only_member_empties_the_ring() {
        let mut arena = Arena::new();
        let root = arena.ring();
        let only = arena.node(1);
        arena.enqueue(root, only);
        arena.remove(only);
        assert!(arena.is_empty(root));
        assert_eq!(arena.next(root), root);
        assert_eq!(arena.prev(root), root);
    }

    #[test]
    fn test_replace_preserves_position() {
        let mut arena = Arena::new();
        let root = arena.ring();
        let a = arena.node(1);
        let b = arena.node(2);
        let c = arena.node(3);
        arena.enqueue(root, a);
        arena.enqueue(root, b);
        arena.enqueue(root, c);

        let d = arena.node(4);
        arena.replace(b, d);
        assert_eq!(collect_forward(&arena, root), vec![a, d, c]);
        assert!(arena.is_self_rooted(b));
        arena.audit(root).unwrap();
    }

    #[test]
    fn test_replace_root_rebases_members() {
        let mut arena = Arena::new();
        let root = arena.ring();
        let a = arena.node(1);
        arena.enqueue(root, a);
        let new_root = arena.ring();
        arena.replace(root, new_root);
        assert_eq!(arena.root_of(a), new_root);
        arena.audit(new_root).unwrap();
    }

    #[test]
    fn test_reroot_rebases_every_node() {
        let mut arena = Arena::new();
        let root = arena.ring();
        let a = arena.node(1);
        let b = arena.node(2);
        arena.enqueue(root, a);
        arena.enqueue(root, b);
        arena.reroot(a);
        assert_eq!(arena.root_of(root), a);
        assert_eq!(arena.root_of(b), a);
        arena.audit(a).unwrap();
    }

    #[test]
    fn test_cut_and_splice_round_trip() {
        let mut arena = Arena::new();
        let root = arena.ring();
        let ids: Vec<_> = (0..5).map(|v| arena.node(v)).collect();
        for &id in &ids {
            arena.enqueue(root, id);
        }

        // Cut [1..=3] out into its own ring rooted at ids[1].
        let cut_root = arena.cut(ids[1], ids[3]);
        assert_eq!(cut_root, ids[1]);
        assert_eq!(collect_forward(&arena, root), vec![ids[0], ids[4]]);
        assert_eq!(arena.root_of(ids[2]), ids[1]);
        assert_eq!(arena.root_of(ids[3]), ids[1]);
        arena.audit(root).unwrap();
        arena.audit(cut_root).unwrap();

        // Splice it back in front of ids[4]: original order restored.
        arena.splice(ids[4], cut_root);
        assert_eq!(
            collect_forward(&arena, root),
            vec![ids[0], ids[1], ids[2], ids[3], ids[4]]
        );
        for &id in &ids {
            assert_eq!(arena.root_of(id), root);
        }
        arena.audit(root).unwrap();
    }

    #[test]
    fn test_apply_stops_on_break() {
        let mut arena = Arena::new();
        let root = arena.ring();
        let ids: Vec<_> = (0..4).map(|v| arena.node(v)).collect();
        for &id in &ids {
            arena.enqueue(root, id);
        }

        let found = arena.apply(arena.next(root), |_, data| {
            if data == Some(&2) {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(found, ids[2]);

        let missed = arena.apply(arena.next(root), |_, data| {
            if data == Some(&99) {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(missed, root);
    }

    #[test]
    fn test_fini_recycles_slots() {
        let mut arena = Arena::new();
        let root = arena.ring();
        let a = arena.node(1);
        arena.enqueue(root, a);
        assert_eq!(arena.fini(a), Some(1));
        assert!(arena.is_empty(root));
        assert_eq!(arena.live(), 1);
        let b = arena.node(2);
        assert_eq!(b, a); // Slot reuse; ids are not ABA-protected.
    }

    #[test]
    fn test_audit_detects_orphaned_members() {
        let mut arena = Arena::new();
        let root = arena.ring();
        let a = arena.node(1);
        let b = arena.node(2);
        arena.enqueue(root, a);
        arena.enqueue(root, b);
        // Removing the root orphans a and b: their root fields still name it.
        arena.remove(root);
        assert!(arena.audit(a).is_err());
    }
}
