// Copyright (c) 2024-present, subdex
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Tree node representation and the arena that owns nodes (component
//! C4), including multi-link sibling (MLS) group compression.
//!
//! Nodes live in a single arena (`Vec<Node>`) and reference each other
//! by index (`NodeId`) rather than by pointer, per the "cyclic parent
//! pointers" design note: an ownership-strict language replaces raw
//! `parent`/`child`/`link` pointers with an arena and optional indices.
//!
//! An MLS run of size `k` is represented as `k` contiguous arena slots
//! (allocated together, so slot `i`'s id is simply the run's starting
//! id plus `i`), which keeps the O(1) "jump directly to slot `b`"
//! lookup from the original pointer-arithmetic trick (`&pos[byte - b0]`)
//! intact under an index-based arena.

use crate::pool::Pool;

/// An index into the node arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).expect("arena index fits in u32"))
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    /// The id of the slot `delta` positions after this one in the same
    /// contiguously-allocated run.
    pub(crate) fn offset(self, delta: u32) -> Self {
        Self(self.0 + delta)
    }
}

/// The label stored on one node: either a single inline byte, or a
/// reference into the interned-string pool.
#[derive(Clone, Copy, Debug)]
pub enum Label {
    /// A single byte, stored inline (the common case for MLS slots and
    /// post-split/normalize nodes).
    Inline(u8),
    /// `length` bytes (2..=255) starting at `offset` inside pool entry
    /// `pool_index`.
    Pooled {
        pool_index: u32,
        offset: u32,
        length: u8,
    },
}

impl Label {
    /// Number of bytes in this label.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Inline(_) => 1,
            Self::Pooled { length, .. } => *length as usize,
        }
    }

    /// Whether this label is empty -- never true for a live node
    /// (invariant 4), only used defensively.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The byte at position `i` of this label.
    #[must_use]
    pub fn byte_at(&self, pool: &Pool, i: usize) -> u8 {
        match self {
            Self::Inline(b) => {
                debug_assert_eq!(i, 0);
                *b
            }
            Self::Pooled {
                pool_index,
                offset,
                length,
            } => {
                debug_assert!(i < *length as usize);
                pool.get(*pool_index as usize)[*offset as usize + i]
            }
        }
    }

    /// The first byte of this label.
    #[must_use]
    pub fn first_byte(&self, pool: &Pool) -> u8 {
        self.byte_at(pool, 0)
    }

    /// Copies the full label into a fresh `Vec<u8>` (used by search and
    /// normalization, where a short-lived owned copy is simplest).
    #[must_use]
    pub fn to_vec(&self, pool: &Pool) -> Vec<u8> {
        (0..self.len()).map(|i| self.byte_at(pool, i)).collect()
    }
}

/// A node in the suffix tree.
pub struct Node {
    pub label: Label,
    /// File-table indices recorded at this node; non-empty means every
    /// suffix spelled root-to-here is a keyword of each referenced file.
    pub matches: Vec<u32>,
    pub child: Option<NodeId>,
    pub link: Option<NodeId>,
    pub parent: Option<NodeId>,
    /// Size of the MLS run this node's slot belongs to, counting from
    /// this slot onward (1 for an ordinary singleton or the run's last
    /// slot).
    pub mls_size: u8,
    /// On-disk offset of `link`'s target when it has been evicted
    /// (0 means "no such edge" or "still resident").
    pub link_off: u64,
    /// On-disk offset of `child`'s target when it has been evicted.
    pub next_off: u64,
    pub modified: bool,
    pub use_counter: u32,
    /// The id of the first slot of the MLS run this node belongs to
    /// (equal to this node's own id for an ordinary singleton). Kept
    /// purely in memory; on reload it is reconstructed for free because
    /// [`Arena::alloc_run`] always allocates a run's slots contiguously,
    /// starting at the id it returns. Lets a slot find its run's head
    /// (and hence the run's full extent) in O(1) without needing
    /// pointer arithmetic relative to label bytes.
    pub run_start: NodeId,
}

impl Node {
    #[must_use]
    pub fn new_leaf(label: Label) -> Self {
        Self {
            label,
            matches: Vec::new(),
            child: None,
            link: None,
            parent: None,
            mls_size: 1,
            link_off: 0,
            next_off: 0,
            modified: true,
            use_counter: 0,
            run_start: NodeId(0),
        }
    }

    /// A node is "empty" (invariant 4) when it has no children, no
    /// matches, and is not a placeholder slot inside a larger MLS run
    /// (i.e. it is its own run's sole, standalone member). Both checks
    /// are needed: `run_start == self_id` alone also holds for the
    /// *head* slot of a run with `mls_size > 1` (its `run_start` is
    /// itself too), so `mls_size == 1` rules that case out.
    #[must_use]
    pub fn is_empty_leaf(&self, self_id: NodeId) -> bool {
        self.matches.is_empty()
            && self.child.is_none()
            && self.mls_size == 1
            && self.run_start == self_id
    }
}

/// The approximate in-memory footprint of one resident node, used to
/// account against the engine's memory budget the way the original
/// engine counts `sizeof(STNode)` per slot.
pub const NODE_FOOTPRINT: usize = std::mem::size_of::<Node>();

/// Owns every resident node, addressed by [`NodeId`].
#[derive(Default)]
pub struct Arena {
    nodes: Vec<Option<Node>>,
    free_singletons: Vec<NodeId>,
    live_count: usize,
}

impl Arena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> &Node {
        self.nodes[id.index()]
            .as_ref()
            .expect("dangling NodeId referenced a freed slot")
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id.index()]
            .as_mut()
            .expect("dangling NodeId referenced a freed slot")
    }

    /// Allocates a single node, reusing a freed singleton slot if one
    /// is available. Its `run_start` is set to its own id (an ordinary
    /// singleton is a run of size one).
    pub fn alloc(&mut self, mut node: Node) -> NodeId {
        self.live_count += 1;
        if let Some(id) = self.free_singletons.pop() {
            node.run_start = id;
            self.nodes[id.index()] = Some(node);
            return id;
        }
        let id = NodeId::from_index(self.nodes.len());
        node.run_start = id;
        self.nodes.push(Some(node));
        id
    }

    /// Allocates `k` nodes as one contiguous run (an MLS group), always
    /// growing fresh storage so the run's slots have adjacent ids. Every
    /// slot's `run_start` is set to the run's first id.
    pub fn alloc_run(&mut self, nodes: Vec<Node>) -> NodeId {
        let start = self.nodes.len();
        let head = NodeId::from_index(start);
        self.live_count += nodes.len();
        self.nodes
            .extend(nodes.into_iter().map(|mut n| {
                n.run_start = head;
                Some(n)
            }));
        head
    }

    /// Frees a standalone (non-MLS) node, returning its slot to the
    /// free list for reuse.
    pub fn free_singleton(&mut self, id: NodeId) {
        debug_assert_eq!(self.get(id).run_start, id);
        self.free_slot(id);
    }

    /// Frees any single slot regardless of its run membership, without
    /// asserting it is standalone. Used when an MLS run is being
    /// rebuilt at a new contiguous location and its old slots are
    /// being retired one at a time.
    pub fn free_slot(&mut self, id: NodeId) {
        self.nodes[id.index()] = None;
        self.free_singletons.push(id);
        self.live_count -= 1;
    }

    /// Number of nodes currently resident in memory.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live_count
    }

    /// Estimated resident memory, mirroring the original's
    /// `used_memory` accounting (node storage only).
    #[must_use]
    pub fn used_memory(&self) -> usize {
        self.live_count * NODE_FOOTPRINT
    }

    /// Visits every currently-resident node, used by the eviction
    /// policy to scan for a victim.
    pub fn for_each_resident(&self, mut f: impl FnMut(NodeId, &Node)) {
        for (i, slot) in self.nodes.iter().enumerate() {
            if let Some(node) = slot {
                f(NodeId::from_index(i), node);
            }
        }
    }

    /// Walks from `id` up through `parent` links to the root, marking
    /// every node along the way `modified`.
    ///
    /// `persist::write_subtree`'s eviction-triggered (`force: false`)
    /// write decides whether to redescend into a child or link using
    /// that edge's *target*'s own `modified` flag, not a full subtree
    /// scan. So marking only the node that actually changed is not
    /// enough: if some ancestor between it and wherever a future
    /// eviction happens to land is left `modified: false`, that
    /// ancestor's stale on-disk offset gets reused and the change
    /// underneath it is silently dropped. Call this at every mutation
    /// site, not just where a node's own fields change.
    pub fn mark_modified_path(&mut self, mut id: NodeId) {
        loop {
            self.get_mut(id).modified = true;
            match self.get(id).parent {
                Some(p) => id = p,
                None => break,
            }
        }
    }
}
