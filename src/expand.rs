// Copyright (c) 2024-present, subdex
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Suffix insertion (component C7).
//!
//! `expand_suffix` inserts exactly one suffix, tagging the node it
//! terminates at with the owning file's index; a caller that wants a
//! whole keyword indexed loops over the keyword's own suffixes and
//! calls it once per suffix, the same convention
//! `original_source/src/doodle/index.c`'s `buildIndex` uses around
//! `DOODLE_tree_expand`. Three shapes of insertion point come up while
//! descending:
//!
//! - the byte diverges before any existing sibling matches it (a new
//!   sibling is linked in, in ascending order);
//! - the byte matches a sibling's first byte and the whole sibling
//!   label is consumed (descend, and keep matching further bytes);
//! - the byte matches but the sibling label diverges partway through
//!   (the sibling is split at the common prefix).
//!
//! A fourth shape folds a newly-inserted single byte into an MLS
//! (multi-link sibling) run when it lands immediately adjacent to an
//! existing *standalone* one-byte sibling (`run_start == self`, i.e. a
//! run of size one): the pair is relocated into one fresh, contiguous
//! two-slot run (see [`fold_into_run`]). Once a sibling is no longer
//! standalone (it is already part of a run of size two or more), this
//! module leaves it alone rather than relocating and growing the run
//! further -- spec.md §4.7 describes the merge as something that "may"
//! happen, and capping it at pairwise folding keeps insertion a simple,
//! always-correct splice instead of an open-ended arena reshuffle.

use crate::cache::Cache;
use crate::io::BufferedIo;
use crate::node::{Arena, Label, Node, NodeId};
use crate::pool::Pool;
use crate::Result;

/// A mutable edge in the tree: either a node's `child` pointer or its
/// `link` pointer. Lets the sibling-chain walk remember "the field that
/// currently points at what I'm looking at" so that folding a node into
/// an MLS run (which replaces it with a different node at a new arena
/// location) can repoint whoever referenced it.
#[derive(Clone, Copy)]
enum Edge {
    Child(NodeId),
    Link(NodeId),
}

impl Edge {
    fn set(self, arena: &mut Arena, target: NodeId) {
        match self {
            Self::Child(owner) => arena.get_mut(owner).child = Some(target),
            Self::Link(owner) => arena.get_mut(owner).link = Some(target),
        }
    }

    /// The node whose field this edge actually mutates. Whoever *points
    /// at* that node decides whether to redescend into it by checking
    /// its `modified` flag, so after `set` this is exactly the id that
    /// needs marking (via [`Arena::mark_modified_path`]), not `parent` --
    /// for a mid-chain `Link` edge the owner is the sibling, not the
    /// parent both share.
    fn owner(self) -> NodeId {
        match self {
            Self::Child(owner) | Self::Link(owner) => owner,
        }
    }
}

/// Whether `id` is the sole member of its own run (an ordinary
/// singleton, eligible to be folded into a fresh pair run). A run's
/// head slot also has `run_start == id`, so `mls_size` must be checked
/// too or a 2+ run's head would be mistaken for a standalone node.
fn is_standalone(arena: &Arena, id: NodeId) -> bool {
    let node = arena.get(id);
    node.run_start == id && node.mls_size == 1
}

/// Relocates `existing` (a standalone one-byte sibling) and a brand new
/// one-byte leaf (matching `file_index`) into one fresh, contiguous
/// two-slot MLS run, preserving `existing`'s matches/child/link.
/// `existing_is_left` says whether `existing` holds the smaller byte
/// (becomes slot 0) or the larger one (becomes slot 1). Returns the new
/// run's head id; `existing`'s old slot is freed.
fn fold_into_run(
    arena: &mut Arena,
    parent: NodeId,
    existing: NodeId,
    existing_is_left: bool,
    new_byte: u8,
    file_index: u32,
) -> NodeId {
    let existing_byte = match arena.get(existing).label {
        Label::Inline(b) => b,
        Label::Pooled { .. } => unreachable!("fold_into_run only folds one-byte labels"),
    };
    let existing_matches = std::mem::take(&mut arena.get_mut(existing).matches);
    let existing_child = arena.get(existing).child;
    let existing_next_off = arena.get(existing).next_off;
    let existing_link = arena.get(existing).link;
    let existing_link_off = arena.get(existing).link_off;

    let mut slot0 = Node::new_leaf(Label::Inline(if existing_is_left {
        existing_byte
    } else {
        new_byte
    }));
    let mut slot1 = Node::new_leaf(Label::Inline(if existing_is_left {
        new_byte
    } else {
        existing_byte
    }));
    slot0.mls_size = 2;
    slot1.mls_size = 1;
    slot0.parent = Some(parent);
    slot1.parent = Some(parent);

    if existing_is_left {
        slot0.matches = existing_matches;
        slot0.child = existing_child;
        slot0.next_off = existing_next_off;
        slot1.matches = vec![file_index];
        slot1.link = existing_link;
        slot1.link_off = existing_link_off;
    } else {
        slot0.matches = vec![file_index];
        slot1.matches = existing_matches;
        slot1.child = existing_child;
        slot1.next_off = existing_next_off;
        slot1.link = existing_link;
        slot1.link_off = existing_link_off;
    }

    let head = arena.alloc_run(vec![slot0, slot1]);
    let tail = head.offset(1);
    if let Some(c) = arena.get(head).child {
        arena.get_mut(c).parent = Some(head);
    }
    if let Some(c) = arena.get(tail).child {
        arena.get_mut(c).parent = Some(tail);
    }
    arena.free_slot(existing);
    head
}

fn make_label(pool: &mut Pool, bytes: &[u8]) -> Label {
    debug_assert!(!bytes.is_empty());
    if bytes.len() == 1 {
        return Label::Inline(bytes[0]);
    }
    let (pool_index, offset) = pool
        .last_ends_with(bytes)
        .or_else(|| pool.find_substring(bytes))
        .unwrap_or_else(|| (pool.append(bytes), 0));
    Label::Pooled {
        pool_index: pool_index as u32,
        offset: offset as u32,
        length: bytes.len() as u8,
    }
}

/// Builds a (possibly chained, for labels over 255 bytes) leaf holding
/// `bytes`, tagging only the final node in the chain with `file_index`
/// since that is the node the suffix actually terminates at.
fn new_suffix_node(arena: &mut Arena, pool: &mut Pool, bytes: &[u8], file_index: u32) -> NodeId {
    let chunk_len = bytes.len().min(255);
    let label = make_label(pool, &bytes[..chunk_len]);
    let mut node = Node::new_leaf(label);
    if chunk_len == bytes.len() {
        node.matches.push(file_index);
        return arena.alloc(node);
    }
    let rest_id = new_suffix_node(arena, pool, &bytes[chunk_len..], file_index);
    let id = arena.alloc(node);
    arena.get_mut(id).child = Some(rest_id);
    arena.get_mut(rest_id).parent = Some(id);
    id
}

/// Resolves `parent`'s first child, lazily loading it from disk if it
/// isn't resident. Shared by insertion and search, both of which walk
/// down from a node's child edge the same way.
pub(crate) fn first_child(
    bio: &mut BufferedIo,
    cache: &mut Cache,
    arena: &mut Arena,
    parent: NodeId,
) -> Result<Option<NodeId>> {
    match arena.get(parent).child {
        Some(c) => Ok(Some(c)),
        None => {
            if arena.get(parent).next_off != 0 {
                Ok(Some(cache.load_child(bio, arena, parent)?))
            } else {
                Ok(None)
            }
        }
    }
}

pub(crate) fn common_prefix_len(arena: &Arena, pool: &Pool, node: NodeId, remaining: &[u8]) -> usize {
    let label = arena.get(node).label;
    let label_len = label.len();
    let max = label_len.min(remaining.len());
    (0..max)
        .take_while(|&i| label.byte_at(pool, i) == remaining[i])
        .count()
}

pub(crate) fn next_sibling(
    cache: &mut Cache,
    bio: &mut BufferedIo,
    arena: &mut Arena,
    id: NodeId,
) -> Result<Option<NodeId>> {
    let mls_size = arena.get(id).mls_size;
    if mls_size > 1 {
        return Ok(Some(id.offset(1)));
    }
    if let Some(link) = arena.get(id).link {
        return Ok(Some(link));
    }
    if arena.get(id).link_off != 0 {
        return Ok(Some(cache.load_link(bio, arena, id)?));
    }
    Ok(None)
}

/// Splits `cur` at `common` bytes into its label, moving the old
/// continuation (child edge and any matches) onto a fresh tail node.
/// Only called when `cur`'s label has at least 2 bytes (so it must be
/// a pooled label, never an inline one).
fn split_node(arena: &mut Arena, cur: NodeId, common: usize) {
    let Label::Pooled {
        pool_index,
        offset,
        length,
    } = arena.get(cur).label
    else {
        unreachable!("split only occurs on a multi-byte (pooled) label");
    };
    let total = length as usize;
    debug_assert!(common >= 1 && common < total);

    let tail_label = if total - common == 1 {
        Label::Inline(0) // byte filled in below once we can read the pool
    } else {
        Label::Pooled {
            pool_index,
            offset: offset + common as u32,
            length: (total - common) as u8,
        }
    };

    let mut tail = Node::new_leaf(tail_label);
    tail.matches = std::mem::take(&mut arena.get_mut(cur).matches);
    tail.child = arena.get(cur).child.take();
    tail.next_off = arena.get(cur).next_off;
    arena.get_mut(cur).next_off = 0;
    tail.link_off = 0;
    tail.modified = true;

    let tail_id = arena.alloc(tail);
    if let Some(c) = arena.get(tail_id).child {
        arena.get_mut(c).parent = Some(tail_id);
    }

    arena.get_mut(cur).label = Label::Pooled {
        pool_index,
        offset,
        length: common as u8,
    };
    arena.get_mut(cur).child = Some(tail_id);
    arena.get_mut(cur).matches = Vec::new();
    arena.get_mut(cur).modified = true;
    arena.get_mut(tail_id).parent = Some(cur);
}

/// Fixes up a single-byte tail label created by [`split_node`], which
/// cannot itself read the pool to resolve the final byte value.
fn finish_inline_tail(pool: &Pool, arena: &mut Arena, cur: NodeId) {
    let tail_id = arena.get(cur).child.expect("split always creates a tail");
    let tail_is_inline_placeholder = matches!(arena.get(tail_id).label, Label::Inline(0));
    if tail_is_inline_placeholder {
        let Label::Pooled {
            pool_index,
            offset,
            length,
        } = arena.get(cur).label
        else {
            return;
        };
        let byte = pool.get(pool_index as usize)[offset as usize + length as usize];
        arena.get_mut(tail_id).label = Label::Inline(byte);
    }
}

/// Splices `new_id` (a freshly-built, not-yet-attached node holding
/// `target`'s byte as its own first byte) into `owner`'s child chain in
/// ascending order, used for the continuation of a just-split node
/// (where no byte further down the keyword is a single-byte leaf worth
/// folding into a run -- the rare path, kept merge-free for simplicity).
fn insert_into_chain(
    cache: &mut Cache,
    bio: &mut BufferedIo,
    arena: &mut Arena,
    pool: &Pool,
    owner: NodeId,
    new_id: NodeId,
) -> Result<()> {
    let target = arena.get(new_id).label.first_byte(pool);
    let mut prev: Option<NodeId> = None;
    let mut cur_opt = arena.get(owner).child;
    loop {
        match cur_opt {
            None => {
                let mutated = match prev {
                    Some(p) => {
                        arena.get_mut(p).link = Some(new_id);
                        p
                    }
                    None => {
                        arena.get_mut(owner).child = Some(new_id);
                        owner
                    }
                };
                arena.mark_modified_path(mutated);
                return Ok(());
            }
            Some(cur) => {
                let cur_first = arena.get(cur).label.first_byte(pool);
                if target < cur_first {
                    arena.get_mut(new_id).link = Some(cur);
                    let mutated = match prev {
                        Some(p) => {
                            arena.get_mut(p).link = Some(new_id);
                            p
                        }
                        None => {
                            arena.get_mut(owner).child = Some(new_id);
                            owner
                        }
                    };
                    arena.mark_modified_path(mutated);
                    return Ok(());
                }
                prev = Some(cur);
                cur_opt = next_sibling(cache, bio, arena, cur)?;
            }
        }
    }
}

/// Inserts exactly one suffix into the tree, tagging the node it
/// terminates at with `file_index`.
///
/// spec.md §6's interface table and §4.7 are explicit that `expand`
/// inserts *one* suffix per call -- the caller is the one who loops
/// over a keyword's `|keyword|` suffixes, the same convention
/// `original_source/src/doodle/index.c`'s `buildIndex` uses around
/// `DOODLE_tree_expand` (one call per `cpos` position). This function
/// is that one-suffix primitive; it never loops over `suffix` itself.
pub fn expand_suffix(
    bio: &mut BufferedIo,
    cache: &mut Cache,
    pool: &mut Pool,
    arena: &mut Arena,
    root: NodeId,
    suffix: &[u8],
    file_index: u32,
) -> Result<()> {
    let mut parent = root;
    let mut pos = 0usize;

    loop {
        let child = first_child(bio, cache, arena, parent)?;

        let Some(mut cur) = child else {
            let new_id = new_suffix_node(arena, pool, &suffix[pos..], file_index);
            arena.get_mut(new_id).parent = Some(parent);
            arena.get_mut(parent).child = Some(new_id);
            arena.mark_modified_path(parent);
            return Ok(());
        };

        // Invariant through the inner loop: `anchor` is the mutable
        // field (either `parent.child` or some earlier sibling's
        // `.link`) that currently points at `cur`.
        let mut anchor = Edge::Child(parent);
        loop {
            let target = suffix[pos];
            let one_byte_left = suffix.len() - pos == 1;
            let cur_first = arena.get(cur).label.first_byte(pool);

            if target < cur_first {
                if one_byte_left
                    && is_standalone(arena, cur)
                    && matches!(arena.get(cur).label, Label::Inline(b) if u16::from(b) == u16::from(target) + 1)
                {
                    let new_head = fold_into_run(arena, parent, cur, false, target, file_index);
                    anchor.set(arena, new_head);
                    arena.mark_modified_path(anchor.owner());
                    return Ok(());
                }

                let new_id = new_suffix_node(arena, pool, &suffix[pos..], file_index);
                arena.get_mut(new_id).parent = Some(parent);
                arena.get_mut(new_id).link = Some(cur);
                anchor.set(arena, new_id);
                arena.mark_modified_path(anchor.owner());
                return Ok(());
            }

            if target == cur_first {
                let remaining = &suffix[pos..];
                let label_len = arena.get(cur).label.len();
                let common = common_prefix_len(arena, pool, cur, remaining);

                if common == label_len && common == remaining.len() {
                    if !arena.get(cur).matches.contains(&file_index) {
                        arena.get_mut(cur).matches.push(file_index);
                    }
                    arena.mark_modified_path(cur);
                    return Ok(());
                } else if common == label_len {
                    parent = cur;
                    pos += label_len;
                    break;
                }

                split_node(arena, cur, common);
                finish_inline_tail(pool, arena, cur);
                let rest = &remaining[common..];
                if rest.is_empty() {
                    let tail_id = arena.get(cur).child.expect("split creates a tail");
                    if !arena.get(tail_id).matches.contains(&file_index) {
                        arena.get_mut(tail_id).matches.push(file_index);
                    }
                } else {
                    let new_id = new_suffix_node(arena, pool, rest, file_index);
                    arena.get_mut(new_id).parent = Some(cur);
                    insert_into_chain(cache, bio, arena, pool, cur, new_id)?;
                }
                arena.mark_modified_path(parent);
                return Ok(());
            }

            match next_sibling(cache, bio, arena, cur)? {
                Some(next) => {
                    if arena.get(cur).mls_size == 1 {
                        anchor = Edge::Link(cur);
                    }
                    cur = next;
                }
                None => {
                    if one_byte_left
                        && is_standalone(arena, cur)
                        && matches!(arena.get(cur).label, Label::Inline(b) if u16::from(b) + 1 == u16::from(target))
                    {
                        let new_head = fold_into_run(arena, parent, cur, true, target, file_index);
                        anchor.set(arena, new_head);
                        arena.mark_modified_path(anchor.owner());
                        return Ok(());
                    }

                    let new_id = new_suffix_node(arena, pool, &suffix[pos..], file_index);
                    arena.get_mut(new_id).parent = Some(parent);
                    arena.get_mut(cur).link = Some(new_id);
                    arena.mark_modified_path(cur);
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_bio() -> BufferedIo {
        let f = tempfile::tempfile().unwrap();
        BufferedIo::with_defaults(f).unwrap()
    }

    /// Test-only stand-in for a caller like `original_source/src/doodle/index.c`'s
    /// `buildIndex`, which loops one suffix at a time rather than handing the
    /// whole keyword to the engine in one call.
    fn expand_every_suffix(
        bio: &mut BufferedIo,
        cache: &mut Cache,
        pool: &mut Pool,
        arena: &mut Arena,
        root: NodeId,
        keyword: &[u8],
        file_index: u32,
    ) {
        for start in 0..keyword.len() {
            expand_suffix(bio, cache, pool, arena, root, &keyword[start..], file_index).unwrap();
        }
    }

    #[test]
    fn inserts_exact_then_diverging_keyword() {
        let mut bio = fresh_bio();
        let mut cache = Cache::new(usize::MAX);
        let mut pool = Pool::new();
        let mut arena = Arena::new();
        let root = arena.alloc(Node::new_leaf(Label::Inline(0)));

        expand_every_suffix(&mut bio, &mut cache, &mut pool, &mut arena, root, b"abcdefg", 0);
        expand_every_suffix(&mut bio, &mut cache, &mut pool, &mut arena, root, b"abcefg", 1);

        let child = arena.get(root).child.unwrap();
        assert_eq!(arena.get(child).label.first_byte(&pool), b'a');
    }

    #[test]
    fn repeated_keyword_adds_match_without_new_node() {
        let mut bio = fresh_bio();
        let mut cache = Cache::new(usize::MAX);
        let mut pool = Pool::new();
        let mut arena = Arena::new();
        let root = arena.alloc(Node::new_leaf(Label::Inline(0)));

        expand_every_suffix(&mut bio, &mut cache, &mut pool, &mut arena, root, b"cat", 0);
        let before = arena.live_count();
        expand_every_suffix(&mut bio, &mut cache, &mut pool, &mut arena, root, b"cat", 1);
        assert_eq!(arena.live_count(), before);
    }

    #[test]
    fn single_call_inserts_exactly_one_suffix() {
        let mut bio = fresh_bio();
        let mut cache = Cache::new(usize::MAX);
        let mut pool = Pool::new();
        let mut arena = Arena::new();
        let root = arena.alloc(Node::new_leaf(Label::Inline(0)));

        expand_suffix(&mut bio, &mut cache, &mut pool, &mut arena, root, b"abcdefg", 0).unwrap();

        // Only the full string is a reachable suffix; a buggy call that
        // looped internally over "abcdefg"'s own suffixes would also
        // insert "bcdefg", "cdefg", ... as further top-level siblings of
        // the "a"-prefixed child.
        let child = arena.get(root).child.unwrap();
        assert_eq!(arena.get(child).label.first_byte(&pool), b'a');
        assert!(next_sibling(&mut cache, &mut bio, &mut arena, child).unwrap().is_none());
    }

    #[test]
    fn insert_before_adjacent_byte_folds_into_mls_run() {
        let mut bio = fresh_bio();
        let mut cache = Cache::new(usize::MAX);
        let mut pool = Pool::new();
        let mut arena = Arena::new();
        let root = arena.alloc(Node::new_leaf(Label::Inline(0)));

        expand_suffix(&mut bio, &mut cache, &mut pool, &mut arena, root, b"b", 0).unwrap();
        expand_suffix(&mut bio, &mut cache, &mut pool, &mut arena, root, b"a", 1).unwrap();

        let head = arena.get(root).child.unwrap();
        assert_eq!(arena.get(head).mls_size, 2);
        assert_eq!(arena.get(head).label.first_byte(&pool), b'a');
        assert_eq!(arena.get(head).matches, vec![1]);
        let tail = head.offset(1);
        assert_eq!(arena.get(tail).label.first_byte(&pool), b'b');
        assert_eq!(arena.get(tail).matches, vec![0]);
    }

    #[test]
    fn tail_append_adjacent_byte_folds_into_mls_run() {
        let mut bio = fresh_bio();
        let mut cache = Cache::new(usize::MAX);
        let mut pool = Pool::new();
        let mut arena = Arena::new();
        let root = arena.alloc(Node::new_leaf(Label::Inline(0)));

        expand_suffix(&mut bio, &mut cache, &mut pool, &mut arena, root, b"a", 0).unwrap();
        expand_suffix(&mut bio, &mut cache, &mut pool, &mut arena, root, b"b", 1).unwrap();

        let head = arena.get(root).child.unwrap();
        assert_eq!(arena.get(head).mls_size, 2);
        assert_eq!(arena.get(head).label.first_byte(&pool), b'a');
        assert_eq!(arena.get(head).matches, vec![0]);
        let tail = head.offset(1);
        assert_eq!(arena.get(tail).label.first_byte(&pool), b'b');
        assert_eq!(arena.get(tail).matches, vec![1]);
    }

    #[test]
    fn non_adjacent_singletons_do_not_fold() {
        let mut bio = fresh_bio();
        let mut cache = Cache::new(usize::MAX);
        let mut pool = Pool::new();
        let mut arena = Arena::new();
        let root = arena.alloc(Node::new_leaf(Label::Inline(0)));

        expand_suffix(&mut bio, &mut cache, &mut pool, &mut arena, root, b"a", 0).unwrap();
        expand_suffix(&mut bio, &mut cache, &mut pool, &mut arena, root, b"z", 1).unwrap();

        let head = arena.get(root).child.unwrap();
        assert_eq!(arena.get(head).mls_size, 1);
        let next = arena.get(head).link.expect("z should be linked, not folded");
        assert_eq!(arena.get(next).label.first_byte(&pool), b'z');
    }
}
