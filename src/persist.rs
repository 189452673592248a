// Copyright (c) 2024-present, subdex
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! On-disk layout and the crash-safe atomic swap (component C5).
//!
//! A database file is: magic, path table, file table, pool, a
//! backpatched root-offset slot, then node records. Edges between
//! records are stored as the positive difference between the
//! referrer's offset and the referee's offset (0 for "no edge"),
//! which is why every node must be written *after* everything it
//! references -- the writer performs a post-order walk.

use crate::cache::Cache;
use crate::coding::{
    read_ulong, read_ulong_full, read_ulong_pair, read_uint, read_zt_string, write_ulong,
    write_ulong_full, write_ulong_pair, write_uint, write_zt_string,
};
use crate::error::FormatError;
use crate::file_table::FileTable;
use crate::io::BufferedIo;
use crate::node::{Arena, Label, Node, NodeId};
use crate::pool::Pool;
use crate::Result;
use std::collections::HashMap;
use std::io::SeekFrom;

/// Live database magic: `"DOO\0" "0007"`.
pub const MAGIC: [u8; 8] = *b"DOO\x000007";
/// Marker for a database that was still being written when the process
/// stopped; a reader must discard it rather than try to recover it.
pub const TRAGIC: [u8; 8] = *b"XOO\x000001";

/// Everything read from (or about to be written to) the header portion
/// of the file: the path table, file table and pool. The node tree is
/// handled separately since most of it stays on disk.
pub struct Header {
    pub file_table: FileTable,
    pub pool: Pool,
    pub root_offset: u64,
}

fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("", path),
    }
}

/// Writes the fixed header (magic, path table, file table, pool) and a
/// zeroed root-offset placeholder, returning the placeholder's file
/// offset so it can be backpatched once the root is known.
pub fn write_header(
    bio: &mut BufferedIo,
    file_table: &FileTable,
    pool: &Pool,
) -> Result<u64> {
    bio.seek(SeekFrom::Start(0))?;
    bio.write_all(&MAGIC)?;

    let mut path_table: Vec<String> = Vec::new();
    let mut path_index: HashMap<String, u32> = HashMap::new();
    let mut per_file_path_index = Vec::with_capacity(file_table.len());
    for entry in file_table.iter() {
        let (prefix, _) = split_path(&entry.path);
        let idx = *path_index.entry(prefix.to_string()).or_insert_with(|| {
            path_table.push(prefix.to_string());
            (path_table.len() - 1) as u32
        });
        per_file_path_index.push(idx);
    }

    write_uint(bio, path_table.len() as u32)?;
    for p in &path_table {
        write_zt_string(bio, p.as_bytes())?;
    }

    write_uint(bio, file_table.len() as u32)?;
    for (entry, pidx) in file_table.iter().zip(per_file_path_index.iter()) {
        let (_, suffix) = split_path(&entry.path);
        write_uint(bio, *pidx)?;
        write_zt_string(bio, suffix.as_bytes())?;
        write_uint(bio, entry.mtime)?;
    }

    write_uint(bio, pool.len() as u32)?;
    for i in 0..pool.len() {
        write_zt_string(bio, pool.get(i))?;
    }

    let root_slot_offset = bio.position();
    write_ulong_full(bio, 0)?;
    Ok(root_slot_offset)
}

/// Backpatches the root-offset slot written by [`write_header`].
pub fn backpatch_root_offset(bio: &mut BufferedIo, slot_offset: u64, root: u64) -> Result<()> {
    bio.seek(SeekFrom::Start(slot_offset))?;
    write_ulong_full(bio, root)?;
    Ok(())
}

/// Reads the magic, path table, file table and pool, leaving the
/// cursor positioned right after the root-offset slot.
pub fn read_header(bio: &mut BufferedIo) -> Result<Header> {
    bio.seek(SeekFrom::Start(0))?;
    let mut magic = [0u8; 8];
    bio.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(FormatError::BadMagic.into());
    }

    let path_count = read_uint(bio)?;
    let mut path_table = Vec::with_capacity(path_count as usize);
    for _ in 0..path_count {
        let bytes = read_zt_string(bio)?;
        path_table.push(String::from_utf8_lossy(&bytes).into_owned());
    }

    let file_count = read_uint(bio)?;
    let mut file_table = FileTable::new();
    for _ in 0..file_count {
        let pidx = read_uint(bio)? as u64;
        let suffix = read_zt_string(bio)?;
        let mtime = read_uint(bio)?;
        let prefix = path_table.get(pidx as usize).ok_or(FormatError::IndexOutOfRange {
            index: pidx,
            bound: path_table.len() as u64,
        })?;
        let suffix = String::from_utf8_lossy(&suffix);
        let path = if prefix.is_empty() {
            suffix.into_owned()
        } else {
            format!("{prefix}/{suffix}")
        };
        file_table.append(path, mtime);
    }

    let pool_count = read_uint(bio)?;
    let mut pool = Pool::new();
    for _ in 0..pool_count {
        let bytes = read_zt_string(bio)?;
        pool.append(&bytes);
    }

    let root_offset = read_ulong_full(bio)?;

    Ok(Header {
        file_table,
        pool,
        root_offset,
    })
}

fn abs_offset(node_start: u64, rel: u64) -> u64 {
    if rel == 0 {
        0
    } else {
        node_start - rel
    }
}

/// Reads one node record (an MLS group of size `mls_size`, or a lone
/// singleton when `mls_size == 1`) starting at `offset`, without
/// following its child/link edges. Returns the freshly-allocated slots'
/// starting id.
pub fn read_node_group(bio: &mut BufferedIo, arena: &mut Arena, offset: u64) -> Result<NodeId> {
    bio.seek(SeekFrom::Start(offset))?;

    let mut clength_buf = [0u8; 1];
    bio.read_exact(&mut clength_buf)?;
    let clength = clength_buf[0];

    let (base_label, mls_size): (LabelSeed, u8) = if clength == 0 {
        let mut mls_buf = [0u8; 1];
        bio.read_exact(&mut mls_buf)?;
        let mls_size = mls_buf[0];
        let mut byte_buf = [0u8; 1];
        bio.read_exact(&mut byte_buf)?;
        (LabelSeed::Inline(byte_buf[0]), mls_size.max(1))
    } else {
        let pool_index = read_uint(bio)?;
        let pool_offset = read_uint(bio)?;
        (
            LabelSeed::Pooled {
                pool_index,
                offset: pool_offset,
                length: clength,
            },
            1,
        )
    };

    let mut nodes = Vec::with_capacity(mls_size as usize);
    for s in 0..mls_size {
        let label = match base_label {
            LabelSeed::Inline(b) => Label::Inline(b + s),
            LabelSeed::Pooled {
                pool_index,
                offset,
                length,
            } => Label::Pooled {
                pool_index,
                offset,
                length,
            },
        };

        let is_last = s == mls_size - 1;
        let (link_off_raw, next_off_raw) = if is_last {
            read_ulong_pair(bio)?
        } else {
            (0, read_ulong(bio)?)
        };
        let match_count = read_uint(bio)?;
        let mut matches = Vec::with_capacity(match_count as usize);
        let pairs = match_count / 2;
        for _ in 0..pairs {
            let (a, b) = crate::coding::read_uint_pair(bio)?;
            matches.push(a);
            matches.push(b);
        }
        if match_count % 2 == 1 {
            matches.push(read_uint(bio)?);
        }

        nodes.push(Node {
            label,
            matches,
            child: None,
            link: None,
            parent: None,
            mls_size: mls_size - s,
            link_off: abs_offset(offset, link_off_raw),
            next_off: abs_offset(offset, next_off_raw),
            modified: false,
            use_counter: 0,
            // Overwritten by `Arena::alloc_run` to the run's head id.
            run_start: NodeId::from_index(0),
        });
    }

    Ok(arena.alloc_run(nodes))
}

#[derive(Clone, Copy)]
enum LabelSeed {
    Inline(u8),
    Pooled {
        pool_index: u32,
        offset: u32,
        length: u8,
    },
}

/// Writes the node/run headed by `head`, recursively writing (or, if
/// `force` is set, lazily loading and then writing) any child/link
/// subtree that is resident-and-modified or not yet on disk at all.
/// Returns the absolute offset the record was written at.
pub fn write_subtree(
    bio: &mut BufferedIo,
    cache: &mut Cache,
    pool: &Pool,
    arena: &mut Arena,
    head: NodeId,
    force: bool,
) -> Result<u64> {
    let mls_size = arena.get(head).mls_size;

    for s in 0..mls_size {
        let slot = head.offset(u32::from(s));
        let child = arena.get(slot).child;
        let next_off = match child {
            Some(cid) => {
                if force || arena.get(cid).modified {
                    write_subtree(bio, cache, pool, arena, cid, force)?
                } else {
                    arena.get(slot).next_off
                }
            }
            None => {
                let existing = arena.get(slot).next_off;
                if existing != 0 && force {
                    let cid = cache.load_child(bio, arena, slot)?;
                    write_subtree(bio, cache, pool, arena, cid, force)?
                } else {
                    existing
                }
            }
        };
        arena.get_mut(slot).next_off = next_off;
    }

    let last = head.offset(u32::from(mls_size - 1));
    let link = arena.get(last).link;
    let link_off = match link {
        Some(lid) => {
            if force || arena.get(lid).modified {
                write_subtree(bio, cache, pool, arena, lid, force)?
            } else {
                arena.get(last).link_off
            }
        }
        None => {
            let existing = arena.get(last).link_off;
            if existing != 0 && force {
                let lid = cache.load_link(bio, arena, last)?;
                write_subtree(bio, cache, pool, arena, lid, force)?
            } else {
                existing
            }
        }
    };
    arena.get_mut(last).link_off = link_off;

    bio.seek(SeekFrom::End(0))?;
    let ret = bio.len();

    let head_label = arena.get(head).label;
    match head_label {
        Label::Inline(b) => {
            bio.write_all(&[0u8])?;
            bio.write_all(&[mls_size])?;
            bio.write_all(&[b])?;
        }
        Label::Pooled {
            pool_index,
            offset,
            length,
        } => {
            bio.write_all(&[length])?;
            write_uint(bio, pool_index)?;
            write_uint(bio, offset)?;
        }
    }

    for s in 0..mls_size {
        let slot = head.offset(u32::from(s));
        let is_last = s == mls_size - 1;
        let (slot_link_off, slot_next_off) = {
            let node = arena.get(slot);
            (node.link_off, node.next_off)
        };
        if is_last {
            let link_rel = if slot_link_off == 0 { 0 } else { ret - slot_link_off };
            let next_rel = if slot_next_off == 0 { 0 } else { ret - slot_next_off };
            write_ulong_pair(bio, link_rel, next_rel)?;
        } else {
            let next_rel = if slot_next_off == 0 { 0 } else { ret - slot_next_off };
            write_ulong(bio, next_rel)?;
        }

        let matches = arena.get(slot).matches.clone();
        write_uint(bio, matches.len() as u32)?;
        let mut it = matches.chunks_exact(2);
        for pair in &mut it {
            crate::coding::write_uint_pair(bio, pair[0], pair[1])?;
        }
        for &last_one in it.remainder() {
            write_uint(bio, last_one)?;
        }

        arena.get_mut(slot).modified = false;
    }

    Ok(ret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_path_handles_bare_filenames() {
        assert_eq!(split_path("nofile"), ("", "nofile"));
        assert_eq!(split_path("/a/b/c.txt"), ("/a/b", "c.txt"));
    }
}
