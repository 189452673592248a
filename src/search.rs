// Copyright (c) 2024-present, subdex
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Exact and approximate substring search (component C9).
//!
//! Exact search follows a single path: the sibling chain is sorted
//! ascending, so a byte greater than every remaining candidate proves
//! there is no match. Approximate search can't use that pruning --
//! any sibling might still be reachable through an edit -- so it scans
//! every child at every level, weighting each of the three edit moves
//! (extra tree byte, extra query byte, substitution) against the
//! caller's budget.

use crate::cache::Cache;
use crate::expand::{common_prefix_len, first_child, next_sibling};
use crate::io::BufferedIo;
use crate::node::{Arena, NodeId};
use crate::pool::Pool;
use crate::Result;

/// Emits every match recorded at `node` and, recursively, at every
/// descendant reachable via `child`/`link` (but not at `node`'s own
/// siblings). Faults in subtrees from disk as needed.
fn emit_subtree(
    bio: &mut BufferedIo,
    cache: &mut Cache,
    pool: &Pool,
    arena: &mut Arena,
    node: NodeId,
    callback: &mut impl FnMut(u32),
) -> Result<usize> {
    let mut count = 0usize;
    for &f in &arena.get(node).matches {
        callback(f);
        count += 1;
    }
    let child = first_child(bio, cache, arena, node)?;
    count += emit_chain(bio, cache, pool, arena, child, callback)?;
    Ok(count)
}

fn emit_chain(
    bio: &mut BufferedIo,
    cache: &mut Cache,
    pool: &Pool,
    arena: &mut Arena,
    node_opt: Option<NodeId>,
    callback: &mut impl FnMut(u32),
) -> Result<usize> {
    let Some(node) = node_opt else {
        return Ok(0);
    };
    let mut count = emit_subtree(bio, cache, pool, arena, node, callback)?;
    let next = next_sibling(cache, bio, arena, node)?;
    count += emit_chain(bio, cache, pool, arena, next, callback)?;
    Ok(count)
}

/// Walks from `root` following exactly the bytes of `needle`, using the
/// MLS run's O(1) jump where the target byte falls inside the run's
/// span. Returns the node the needle fully lands on (possibly mid-label),
/// or `None` if no path spells `needle` as a prefix.
fn descend_exact(
    bio: &mut BufferedIo,
    cache: &mut Cache,
    pool: &Pool,
    arena: &mut Arena,
    root: NodeId,
    needle: &[u8],
) -> Result<Option<NodeId>> {
    let mut parent = root;
    let mut pos = 0usize;

    loop {
        let Some(mut cur) = first_child(bio, cache, arena, parent)? else {
            return Ok(None);
        };

        loop {
            let target = needle[pos];
            let cur_first = arena.get(cur).label.first_byte(pool);

            if target < cur_first {
                return Ok(None);
            }

            if target > cur_first {
                let mls_size = arena.get(cur).mls_size;
                let delta = target - cur_first;
                if mls_size > 1 && delta < mls_size {
                    cur = cur.offset(u32::from(delta));
                    continue;
                }
                match next_sibling(cache, bio, arena, cur)? {
                    Some(next) => {
                        cur = next;
                        continue;
                    }
                    None => return Ok(None),
                }
            }

            let remaining = &needle[pos..];
            let label_len = arena.get(cur).label.len();
            let common = common_prefix_len(arena, pool, cur, remaining);

            if common == remaining.len() {
                return Ok(Some(cur));
            }
            if common == label_len {
                parent = cur;
                pos += label_len;
                break;
            }
            return Ok(None);
        }
    }
}

/// Exact substring search. Returns the number of matches emitted
/// through `callback` (a file index may be emitted more than once if
/// it was inserted via more than one suffix landing in the same
/// subtree; the caller deduplicates).
pub fn search(
    bio: &mut BufferedIo,
    cache: &mut Cache,
    pool: &Pool,
    arena: &mut Arena,
    root: NodeId,
    needle: &[u8],
    mut callback: impl FnMut(u32),
) -> Result<usize> {
    if needle.is_empty() {
        return Ok(0);
    }
    match descend_exact(bio, cache, pool, arena, root, needle)? {
        Some(landed) => emit_subtree(bio, cache, pool, arena, landed, &mut callback),
        None => Ok(0),
    }
}

#[allow(clippy::too_many_arguments)]
fn visit_node(
    bio: &mut BufferedIo,
    cache: &mut Cache,
    pool: &Pool,
    arena: &mut Arena,
    node: NodeId,
    label_pos: usize,
    needle: &[u8],
    needle_pos: usize,
    budget: u32,
    ignore_case: bool,
    callback: &mut impl FnMut(u32),
    count: &mut usize,
) -> Result<()> {
    if needle_pos == needle.len() {
        *count += emit_subtree(bio, cache, pool, arena, node, callback)?;
        return Ok(());
    }

    let label_len = arena.get(node).label.len();
    if label_pos == label_len {
        let child = first_child(bio, cache, arena, node)?;
        return visit_chain(
            bio, cache, pool, arena, child, needle, needle_pos, budget, ignore_case, callback,
            count,
        );
    }

    let label_byte = arena.get(node).label.byte_at(pool, label_pos);
    let needle_byte = needle[needle_pos];
    let same = if ignore_case {
        label_byte.to_ascii_lowercase() == needle_byte.to_ascii_lowercase()
    } else {
        label_byte == needle_byte
    };

    if same {
        visit_node(
            bio,
            cache,
            pool,
            arena,
            node,
            label_pos + 1,
            needle,
            needle_pos + 1,
            budget,
            ignore_case,
            callback,
            count,
        )?;
    }

    if budget > 0 {
        // Extra byte in the tree: skip this label byte.
        visit_node(
            bio,
            cache,
            pool,
            arena,
            node,
            label_pos + 1,
            needle,
            needle_pos,
            budget - 1,
            ignore_case,
            callback,
            count,
        )?;
        // Extra byte in the query: skip this needle byte.
        visit_node(
            bio,
            cache,
            pool,
            arena,
            node,
            label_pos,
            needle,
            needle_pos + 1,
            budget - 1,
            ignore_case,
            callback,
            count,
        )?;
        // Substitution: consume both regardless of their values.
        visit_node(
            bio,
            cache,
            pool,
            arena,
            node,
            label_pos + 1,
            needle,
            needle_pos + 1,
            budget - 1,
            ignore_case,
            callback,
            count,
        )?;
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn visit_chain(
    bio: &mut BufferedIo,
    cache: &mut Cache,
    pool: &Pool,
    arena: &mut Arena,
    node_opt: Option<NodeId>,
    needle: &[u8],
    needle_pos: usize,
    budget: u32,
    ignore_case: bool,
    callback: &mut impl FnMut(u32),
    count: &mut usize,
) -> Result<()> {
    let Some(node) = node_opt else {
        return Ok(());
    };
    visit_node(
        bio, cache, pool, arena, node, 0, needle, needle_pos, budget, ignore_case, callback,
        count,
    )?;
    let next = next_sibling(cache, bio, arena, node)?;
    visit_chain(
        bio, cache, pool, arena, next, needle, needle_pos, budget, ignore_case, callback, count,
    )
}

/// Approximate substring search with an edit-distance budget of
/// `budget` (insertions, deletions, substitutions), optionally folding
/// ASCII case. Every child at every level is considered, since an edit
/// can redirect the match into any sibling regardless of byte order.
#[allow(clippy::too_many_arguments)]
pub fn search_approx(
    bio: &mut BufferedIo,
    cache: &mut Cache,
    pool: &Pool,
    arena: &mut Arena,
    root: NodeId,
    budget: u32,
    ignore_case: bool,
    needle: &[u8],
    mut callback: impl FnMut(u32),
) -> Result<usize> {
    if needle.is_empty() {
        return Ok(0);
    }
    let mut count = 0usize;
    let child = first_child(bio, cache, arena, root)?;
    visit_chain(
        bio,
        cache,
        pool,
        arena,
        child,
        needle,
        0,
        budget,
        ignore_case,
        &mut callback,
        &mut count,
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand::expand_suffix;
    use crate::node::{Label, Node};

    fn fresh_bio() -> BufferedIo {
        let f = tempfile::tempfile().unwrap();
        BufferedIo::with_defaults(f).unwrap()
    }

    /// Indexes every suffix of `keyword`, the way a caller of the one-
    /// suffix-per-call `expand` primitive is expected to (see
    /// `expand.rs`'s module docs) -- needed here so these tests can
    /// exercise genuine mid-word substring search, not just matches
    /// anchored at the start of an inserted string.
    fn expand_keyword(
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

    fn hits(
        bio: &mut BufferedIo,
        cache: &mut Cache,
        pool: &Pool,
        arena: &mut Arena,
        root: NodeId,
        needle: &[u8],
    ) -> Vec<u32> {
        let mut out = Vec::new();
        search(bio, cache, pool, arena, root, needle, |f| out.push(f)).unwrap();
        out
    }

    #[test]
    fn exact_search_finds_inserted_keyword() {
        let mut bio = fresh_bio();
        let mut cache = Cache::new(usize::MAX);
        let mut pool = Pool::new();
        let mut arena = Arena::new();
        let root = arena.alloc(Node::new_leaf(Label::Inline(0)));

        expand_keyword(&mut bio, &mut cache, &mut pool, &mut arena, root, b"abcdefg", 0);

        assert_eq!(hits(&mut bio, &mut cache, &pool, &mut arena, root, b"cde"), vec![0]);
        assert_eq!(hits(&mut bio, &mut cache, &pool, &mut arena, root, b"zzz"), Vec::<u32>::new());
    }

    #[test]
    fn exact_search_e3_distinguishes_close_keywords() {
        let mut bio = fresh_bio();
        let mut cache = Cache::new(usize::MAX);
        let mut pool = Pool::new();
        let mut arena = Arena::new();
        let root = arena.alloc(Node::new_leaf(Label::Inline(0)));

        expand_keyword(&mut bio, &mut cache, &mut pool, &mut arena, root, b"1998-foo", 0);
        expand_keyword(&mut bio, &mut cache, &mut pool, &mut arena, root, b"1998,2000", 0);
        expand_keyword(&mut bio, &mut cache, &mut pool, &mut arena, root, b"1999-bar", 0);

        assert_eq!(
            hits(&mut bio, &mut cache, &pool, &mut arena, root, b"1998-foo"),
            vec![0]
        );
    }

    #[test]
    fn approx_search_e1() {
        let mut bio = fresh_bio();
        let mut cache = Cache::new(usize::MAX);
        let mut pool = Pool::new();
        let mut arena = Arena::new();
        let root = arena.alloc(Node::new_leaf(Label::Inline(0)));

        expand_keyword(&mut bio, &mut cache, &mut pool, &mut arena, root, b"abcdefg", 0);

        let mut out = Vec::new();
        let n = search_approx(&mut bio, &mut cache, &pool, &mut arena, root, 1, false, b"abcefg", |f| {
            out.push(f);
        })
        .unwrap();
        assert_eq!(n, 1);
        assert_eq!(out, vec![0]);

        out.clear();
        let n = search_approx(&mut bio, &mut cache, &pool, &mut arena, root, 1, false, b"abCefg", |f| {
            out.push(f);
        })
        .unwrap();
        assert_eq!(n, 0);

        out.clear();
        let n = search_approx(&mut bio, &mut cache, &pool, &mut arena, root, 1, true, b"abCefg", |f| {
            out.push(f);
        })
        .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn approx_search_e2() {
        let mut bio = fresh_bio();
        let mut cache = Cache::new(usize::MAX);
        let mut pool = Pool::new();
        let mut arena = Arena::new();
        let root = arena.alloc(Node::new_leaf(Label::Inline(0)));

        expand_keyword(&mut bio, &mut cache, &mut pool, &mut arena, root, b"xYz", 0);

        assert_eq!(
            hits(&mut bio, &mut cache, &pool, &mut arena, root, b"abc"),
            Vec::<u32>::new()
        );

        let mut out = Vec::new();
        let n = search_approx(&mut bio, &mut cache, &pool, &mut arena, root, 1, false, b"xz", |f| {
            out.push(f);
        })
        .unwrap();
        assert_eq!(n, 1);

        out.clear();
        let n = search_approx(&mut bio, &mut cache, &pool, &mut arena, root, 1, false, b"xYxz", |f| {
            out.push(f);
        })
        .unwrap();
        assert_eq!(n, 1);

        out.clear();
        let n = search_approx(&mut bio, &mut cache, &pool, &mut arena, root, 1, false, b"xYxxz", |f| {
            out.push(f);
        })
        .unwrap();
        assert_eq!(n, 0);
    }
}
