// Copyright (c) 2024-present, subdex
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Bounded-memory node cache and eviction (component C6).
//!
//! The tree can describe a corpus far larger than RAM because most of
//! it is allowed to live only on disk: a node's `child`/`link` can be
//! `None` in memory while its `next_off`/`link_off` still name where
//! the subtree lives on disk. [`Cache::load_child`]/[`load_link`] fault
//! a subtree back in on demand; [`Cache::shrink`] walks back down and
//! writes+drops resident subtrees once the budget is exceeded.

use crate::io::BufferedIo;
use crate::node::{Arena, NodeId};
use crate::persist;
use crate::pool::Pool;
use crate::Result;
use std::collections::HashSet;

/// Tracks the memory budget and the bookkeeping eviction needs
/// (mutation counter, per-node use counters).
pub struct Cache {
    memory_limit: usize,
    mutation_counter: u64,
    writable: bool,
}

impl Cache {
    #[must_use]
    pub fn new(memory_limit: usize) -> Self {
        Self::with_writable(memory_limit, true)
    }

    #[must_use]
    pub fn with_writable(memory_limit: usize, writable: bool) -> Self {
        Self {
            memory_limit,
            mutation_counter: 0,
            writable,
        }
    }

    pub fn set_memory_limit(&mut self, limit: usize) {
        self.memory_limit = limit;
    }

    #[must_use]
    pub fn memory_limit(&self) -> usize {
        self.memory_limit
    }

    /// Called once per structural mutation (an `expand` or `truncate`
    /// step); widens how aggressively the next shrink evicts, matching
    /// the original's `swapLimit = mutationCount/2 + 1`.
    pub fn note_mutation(&mut self) {
        self.mutation_counter += 1;
    }

    fn swap_limit(&self) -> u32 {
        u32::try_from(self.mutation_counter / 2 + 1).unwrap_or(u32::MAX)
    }

    /// Bumps the use counter of a node that was just visited, so a
    /// later shrink prefers to evict colder nodes first.
    pub fn touch(&self, arena: &mut Arena, id: NodeId) {
        let node = arena.get_mut(id);
        node.use_counter = node.use_counter.saturating_add(1);
    }

    /// Faults in `parent`'s child subtree if it isn't resident, then
    /// returns its (now-resident) id.
    pub fn load_child(
        &mut self,
        bio: &mut BufferedIo,
        arena: &mut Arena,
        parent: NodeId,
    ) -> Result<NodeId> {
        if let Some(id) = arena.get(parent).child {
            self.touch(arena, id);
            return Ok(id);
        }
        let offset = arena.get(parent).next_off;
        debug_assert_ne!(offset, 0, "loadChild called with no on-disk child");
        let head = persist::read_node_group(bio, arena, offset)?;
        self.attach_parent(arena, head, parent);
        arena.get_mut(parent).child = Some(head);
        Ok(head)
    }

    /// Faults in the sibling-chain continuation linked from the last
    /// slot of `run_last`'s MLS group, if it isn't resident.
    pub fn load_link(
        &mut self,
        bio: &mut BufferedIo,
        arena: &mut Arena,
        run_last: NodeId,
    ) -> Result<NodeId> {
        if let Some(id) = arena.get(run_last).link {
            self.touch(arena, id);
            return Ok(id);
        }
        let offset = arena.get(run_last).link_off;
        debug_assert_ne!(offset, 0, "loadLink called with no on-disk link");
        let head = persist::read_node_group(bio, arena, offset)?;
        let parent = arena.get(run_last).parent;
        self.attach_parent_opt(arena, head, parent);
        arena.get_mut(run_last).link = Some(head);
        Ok(head)
    }

    fn attach_parent(&self, arena: &mut Arena, head: NodeId, parent: NodeId) {
        self.attach_parent_opt(arena, head, Some(parent));
    }

    fn attach_parent_opt(&self, arena: &mut Arena, head: NodeId, parent: Option<NodeId>) {
        let mls_size = arena.get(head).mls_size;
        for s in 0..mls_size {
            arena.get_mut(head.offset(u32::from(s))).parent = parent;
        }
    }

    /// Shrinks resident memory by walking the whole tree from
    /// `triggering` (every call site in this crate passes the tree
    /// root), evicting every eligible child/link edge it finds in one
    /// pass, per spec.md §4.6 step 2 / `tree.c`'s `processShrink`.
    ///
    /// `triggering`'s own ancestor chain (the "keep chain") is never
    /// evicted, so the call that just faulted `triggering` in doesn't
    /// immediately evict it; everything else reachable is visited once.
    pub fn shrink(
        &mut self,
        bio: &mut BufferedIo,
        pool: &Pool,
        arena: &mut Arena,
        triggering: NodeId,
    ) -> Result<()> {
        if arena.used_memory() <= self.memory_limit {
            return Ok(());
        }

        let limit = self.swap_limit();
        self.mutation_counter = 0;

        let mut keep = HashSet::new();
        let mut cur = Some(triggering);
        while let Some(id) = cur {
            keep.insert(id);
            cur = arena.get(id).parent;
        }

        self.shrink_chain(bio, pool, arena, &keep, limit, triggering)
    }

    /// Visits every slot of the MLS run starting at `head`, plus the
    /// run's trailing sibling-chain `link`, deciding per edge whether to
    /// evict its target or recurse further into it.
    fn shrink_chain(
        &mut self,
        bio: &mut BufferedIo,
        pool: &Pool,
        arena: &mut Arena,
        keep: &HashSet<NodeId>,
        limit: u32,
        head: NodeId,
    ) -> Result<()> {
        let mls_size = arena.get(head).mls_size;
        for s in 0..mls_size {
            let slot = head.offset(u32::from(s));
            if let Some(child) = arena.get(slot).child {
                self.shrink_edge(bio, pool, arena, keep, limit, slot, child, Edge::Child)?;
            }
        }
        let last = head.offset(u32::from(mls_size.saturating_sub(1)));
        if let Some(link) = arena.get(last).link {
            self.shrink_edge(bio, pool, arena, keep, limit, last, link, Edge::Link)?;
        }
        Ok(())
    }

    /// Decides the fate of one resident edge (`owner`'s `child` or the
    /// run-last slot's `link`, as `kind` says): evict `target` if it is
    /// off the keep chain and its `use_counter <= swap_limit` (and the
    /// cache is writable, or `target` isn't `modified`); otherwise reset
    /// its `use_counter` to 0 and recurse into it looking for eviction
    /// candidates further down.
    fn shrink_edge(
        &mut self,
        bio: &mut BufferedIo,
        pool: &Pool,
        arena: &mut Arena,
        keep: &HashSet<NodeId>,
        limit: u32,
        owner: NodeId,
        target: NodeId,
        kind: Edge,
    ) -> Result<()> {
        if keep.contains(&target) {
            return self.shrink_chain(bio, pool, arena, keep, limit, target);
        }

        let eligible = arena.get(target).use_counter <= limit && (self.writable || !arena.get(target).modified);
        if !eligible {
            arena.get_mut(target).use_counter = 0;
            return self.shrink_chain(bio, pool, arena, keep, limit, target);
        }

        let off = persist::write_subtree(bio, self, pool, arena, target, false)?;
        match kind {
            Edge::Child => {
                arena.get_mut(owner).next_off = off;
                arena.get_mut(owner).child = None;
            }
            Edge::Link => {
                arena.get_mut(owner).link_off = off;
                arena.get_mut(owner).link = None;
            }
        }
        free_subtree(arena, target);
        arena.mark_modified_path(owner);
        Ok(())
    }
}

/// Which field of `owner` an edge visited by [`Cache::shrink_edge`]
/// names: its `child` pointer, or (only meaningful on an MLS run's last
/// slot) its `link` pointer.
#[derive(Clone, Copy)]
enum Edge {
    Child,
    Link,
}

/// Reclaims every arena slot under `head` (its whole MLS run, plus
/// everything reachable via `child`/`link` below it) after its content
/// has already been durably written to disk by the caller. Without
/// this, evicting a subtree would only clear the parent's pointer to
/// it, leaking the slots forever and defeating the memory budget.
fn free_subtree(arena: &mut Arena, head: NodeId) {
    let mls_size = arena.get(head).mls_size;
    for s in 0..mls_size {
        let slot = head.offset(u32::from(s));
        if let Some(child) = arena.get(slot).child {
            free_subtree(arena, child);
        }
    }
    let last = head.offset(u32::from(mls_size.saturating_sub(1)));
    if let Some(link) = arena.get(last).link {
        free_subtree(arena, link);
    }
    for s in 0..mls_size {
        arena.free_slot(head.offset(u32::from(s)));
    }
}
