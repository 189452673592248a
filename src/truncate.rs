// Copyright (c) 2024-present, subdex
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Removing a file's matches from the tree and compacting the file
//! table afterward (component C8).
//!
//! The file table is swap-compacted (`FileTable::remove_swap` moves
//! the last entry into the freed slot), so every match entry that
//! referenced the old last index has to be rewritten to the index it
//! moved to. A node that becomes empty (no matches, no children) is
//! unlinked from its sibling chain and freed, except a node that is
//! part of a larger MLS run (`run_start != self`, whether an
//! intermediate or the final slot): freeing it would break the
//! contiguous-slot addressing the run depends on, so it is left in
//! place, inert, until the whole run is eventually rebuilt or reloaded.

use crate::cache::Cache;
use crate::file_table::FileTable;
use crate::io::BufferedIo;
use crate::node::{Arena, NodeId};
use crate::pool::Pool;
use crate::Result;

fn sweep(
    bio: &mut BufferedIo,
    cache: &mut Cache,
    pool: &Pool,
    arena: &mut Arena,
    node_opt: Option<NodeId>,
    target_index: u32,
) -> Result<Option<NodeId>> {
    let Some(node) = node_opt else {
        return Ok(None);
    };

    if arena.get(node).child.is_none() && arena.get(node).next_off != 0 {
        cache.load_child(bio, arena, node)?;
    }
    let child = arena.get(node).child;
    let new_child = sweep(bio, cache, pool, arena, child, target_index)?;
    arena.get_mut(node).child = new_child;
    if new_child != child {
        arena.mark_modified_path(node);
    }
    if new_child.is_none() {
        arena.get_mut(node).next_off = 0;
    }

    if let Some(pos) = arena.get(node).matches.iter().position(|&m| m == target_index) {
        arena.get_mut(node).matches.swap_remove(pos);
        arena.mark_modified_path(node);
    }

    let mls_size = arena.get(node).mls_size;
    if mls_size > 1 {
        sweep(bio, cache, pool, arena, Some(node.offset(1)), target_index)?;
        return Ok(Some(node));
    }

    if arena.get(node).link.is_none() && arena.get(node).link_off != 0 {
        cache.load_link(bio, arena, node)?;
    }
    let link = arena.get(node).link;
    let new_link = sweep(bio, cache, pool, arena, link, target_index)?;
    arena.get_mut(node).link = new_link;
    if new_link != link {
        arena.mark_modified_path(node);
    }

    if arena.get(node).is_empty_leaf(node) {
        arena.free_singleton(node);
        return Ok(new_link);
    }

    Ok(Some(node))
}

fn rewrite_index(
    bio: &mut BufferedIo,
    cache: &mut Cache,
    pool: &Pool,
    arena: &mut Arena,
    node_opt: Option<NodeId>,
    from: u32,
    to: u32,
) -> Result<()> {
    let Some(node) = node_opt else {
        return Ok(());
    };

    if arena.get(node).child.is_none() && arena.get(node).next_off != 0 {
        cache.load_child(bio, arena, node)?;
    }
    let child = arena.get(node).child;
    rewrite_index(bio, cache, pool, arena, child, from, to)?;

    let mut changed = false;
    for m in &mut arena.get_mut(node).matches {
        if *m == from {
            *m = to;
            changed = true;
        }
    }
    if changed {
        arena.mark_modified_path(node);
    }

    let mls_size = arena.get(node).mls_size;
    if mls_size > 1 {
        return rewrite_index(bio, cache, pool, arena, Some(node.offset(1)), from, to);
    }

    if arena.get(node).link.is_none() && arena.get(node).link_off != 0 {
        cache.load_link(bio, arena, node)?;
    }
    let link = arena.get(node).link;
    rewrite_index(bio, cache, pool, arena, link, from, to)
}

/// Removes `file_table[target_index]`'s matches from the tree, GCs any
/// node that becomes empty as a result, then swap-compacts the file
/// table and rewrites the index of whatever entry moved into the
/// freed slot.
pub fn truncate_one(
    bio: &mut BufferedIo,
    cache: &mut Cache,
    pool: &Pool,
    arena: &mut Arena,
    root: NodeId,
    file_table: &mut FileTable,
    target_index: u32,
) -> Result<()> {
    let head = arena.get(root).child;
    let new_head = sweep(bio, cache, pool, arena, head, target_index)?;
    arena.get_mut(root).child = new_head;
    if new_head.is_none() {
        arena.get_mut(root).next_off = 0;
    }

    if let Some(moved_from) = file_table.remove_swap(target_index as usize) {
        let head_after = arena.get(root).child;
        rewrite_index(bio, cache, pool, arena, head_after, moved_from as u32, target_index)?;
    }
    file_table.compact_capacity();
    Ok(())
}

/// Truncates several files in one pass. Indices are taken against the
/// file table as it stands *before* any of them are removed.
pub fn truncate_multiple(
    bio: &mut BufferedIo,
    cache: &mut Cache,
    pool: &Pool,
    arena: &mut Arena,
    root: NodeId,
    file_table: &mut FileTable,
    indices: &[usize],
) -> Result<()> {
    let mut sorted: Vec<usize> = indices.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    sorted.dedup();
    for idx in sorted {
        truncate_one(bio, cache, pool, arena, root, file_table, idx as u32)?;
    }
    Ok(())
}

/// Truncates every file for which `still_present` returns `false`.
/// Scanning the filesystem to decide that is the caller's job; this
/// engine only knows what it was told via `expand`.
pub fn truncate_deleted(
    bio: &mut BufferedIo,
    cache: &mut Cache,
    pool: &Pool,
    arena: &mut Arena,
    root: NodeId,
    file_table: &mut FileTable,
    still_present: impl Fn(&str) -> bool,
) -> Result<()> {
    let stale: Vec<usize> = file_table
        .iter()
        .enumerate()
        .filter(|(_, e)| !still_present(&e.path))
        .map(|(i, _)| i)
        .collect();
    truncate_multiple(bio, cache, pool, arena, root, file_table, &stale)
}

/// Truncates every file whose recorded modification time no longer
/// matches what the caller observes now (including files that
/// vanished, signaled by `current_mtime` returning `None`).
pub fn truncate_modified(
    bio: &mut BufferedIo,
    cache: &mut Cache,
    pool: &Pool,
    arena: &mut Arena,
    root: NodeId,
    file_table: &mut FileTable,
    current_mtime: impl Fn(&str) -> Option<u32>,
) -> Result<()> {
    let stale: Vec<usize> = file_table
        .iter()
        .enumerate()
        .filter(|(_, e)| current_mtime(&e.path) != Some(e.mtime))
        .map(|(i, _)| i)
        .collect();
    truncate_multiple(bio, cache, pool, arena, root, file_table, &stale)
}
