// Copyright (c) 2024-present, subdex
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! `SuffixTreeEngine`: ties C1-C9 together behind the public operations
//! of spec.md §6.
//!
//! Opening, closing and the crash-recovery "tragic magic" dance live
//! here rather than in `persist.rs`, since they are session-lifecycle
//! concerns (locking, atomic rename) rather than record-format
//! concerns.

use crate::cache::Cache;
use crate::config::Config;
use crate::error::{FormatError, UsageError};
use crate::expand::{self, first_child, next_sibling};
use crate::file_table::{FileEntry, FileTable};
use crate::io::BufferedIo;
use crate::lock;
use crate::logger::{Level, Logger, StdLogger};
use crate::node::{Arena, Label, Node, NodeId};
use crate::persist;
use crate::pool::Pool;
use crate::search;
use crate::truncate;
use crate::Result;
use std::fs::{File, OpenOptions};
use std::io::{SeekFrom, Write as _};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// An open suffix tree database.
pub struct SuffixTreeEngine {
    bio: BufferedIo,
    cache: Cache,
    pool: Pool,
    arena: Arena,
    root: NodeId,
    file_table: FileTable,
    path: PathBuf,
    config: Config,
    writable: bool,
    logger: Box<dyn Logger>,
}

fn fresh_state() -> (FileTable, Pool, Arena, NodeId) {
    let mut arena = Arena::new();
    let root = arena.alloc(Node::new_leaf(Label::Inline(0)));
    (FileTable::new(), Pool::new(), arena, root)
}

impl SuffixTreeEngine {
    pub(crate) fn open(path: &Path, config: Config, writable: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .create(writable)
            .open(path)?;

        if writable {
            lock::lock_exclusive(&file)?;
        } else {
            lock::lock_shared(&file)?;
        }

        let mut bio = BufferedIo::new(file, config.buffer_size())?;

        let (file_table, pool, arena, root) = if bio.is_empty() {
            if !writable {
                return Err(FormatError::BadMagic.into());
            }
            bio.write_all(&persist::TRAGIC)?;
            bio.flush()?;
            fresh_state()
        } else {
            let mut magic = [0u8; 8];
            bio.seek(SeekFrom::Start(0))?;
            bio.read_exact(&mut magic)?;
            if magic == persist::TRAGIC {
                if !writable {
                    return Err(FormatError::BadMagic.into());
                }
                fresh_state()
            } else if magic == persist::MAGIC {
                let header = persist::read_header(&mut bio)?;
                if header.root_offset == 0 {
                    let mut arena = Arena::new();
                    let root = arena.alloc(Node::new_leaf(Label::Inline(0)));
                    (header.file_table, header.pool, arena, root)
                } else {
                    let mut arena = Arena::new();
                    let root = persist::read_node_group(&mut bio, &mut arena, header.root_offset)?;
                    (header.file_table, header.pool, arena, root)
                }
            } else {
                return Err(FormatError::BadMagic.into());
            }
        };

        Ok(Self {
            bio,
            cache: Cache::with_writable(config.memory_limit(), writable),
            pool,
            arena,
            root,
            file_table,
            path: path.to_path_buf(),
            config,
            writable,
            logger: Box::new(StdLogger),
        })
    }

    /// Substitutes the logging collaborator (defaults to [`StdLogger`]).
    pub fn set_logger(&mut self, logger: Box<dyn Logger>) {
        self.logger = logger;
    }

    /// Writes a fresh copy of the database to a sibling temporary file,
    /// fsyncs it, and atomically renames it over the original, then
    /// releases the file-region lock. Consumes the engine, matching the
    /// original's "close invalidates the handle" contract.
    pub fn close(mut self) -> Result<()> {
        if !self.writable {
            lock::unlock(self.bio.file())?;
            return Ok(());
        }

        // `write_subtree(force: true)` rewrites every node regardless of
        // its `modified` flag, but it still lazily faults in anything
        // that is `None` with a non-zero on-disk offset -- and it would
        // fault it in from whichever `BufferedIo` it's given. Since the
        // fresh copy below is written to a *different* file than the
        // one those offsets were recorded against, every subtree has to
        // be resident (loaded from the original file) before we switch
        // to writing into the new one.
        hydrate_subtree(&mut self.bio, &mut self.cache, &mut self.arena, self.root)?;

        let parent = self.path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        {
            let handle = temp.as_file().try_clone()?;
            let mut out = BufferedIo::new(handle, self.config.buffer_size())?;
            let slot = persist::write_header(&mut out, &self.file_table, &self.pool)?;
            let root_offset =
                persist::write_subtree(&mut out, &mut self.cache, &self.pool, &mut self.arena, self.root, true)?;
            persist::backpatch_root_offset(&mut out, slot, root_offset)?;
            out.flush()?;
            out.file().sync_all()?;
        }
        temp.persist(&self.path).map_err(|e| e.error)?;

        #[cfg(not(target_os = "windows"))]
        {
            let dir = File::open(parent)?;
            dir.sync_all()?;
        }

        self.logger.log("close", Level::Verbose, "wrote fresh database and renamed it into place");
        lock::unlock(self.bio.file())?;
        Ok(())
    }

    /// Changes the node-memory budget, evicting immediately if the new
    /// limit is already exceeded.
    pub fn set_memory_limit(&mut self, bytes: usize) -> Result<()> {
        self.cache.set_memory_limit(bytes);
        self.cache.shrink(&mut self.bio, &self.pool, &mut self.arena, self.root)
    }

    /// Number of indexed files.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.file_table.len()
    }

    /// Borrows the file-table entry at `index`.
    #[must_use]
    pub fn file_at(&self, index: usize) -> Option<&FileEntry> {
        self.file_table.get(index)
    }

    /// Inserts one suffix under `path`, creating or re-stamping the file
    /// entry's mtime as needed.
    ///
    /// Matches spec.md §6's interface table and §4.7 literally: this
    /// inserts exactly the bytes of `suffix`, nothing more. A caller
    /// indexing a whole keyword loops over the keyword's own suffixes
    /// and calls this once per suffix (`expand(keyword[i..], path)` for
    /// `i` in `0..keyword.len()`), the same convention
    /// `original_source/src/doodle/index.c`'s `buildIndex` uses around
    /// `DOODLE_tree_expand`.
    pub fn expand(&mut self, suffix: &str, path: &str) -> Result<()> {
        if suffix.is_empty() {
            return Err(UsageError::EmptyKeyword.into());
        }
        let mtime = stat_mtime(path)?;
        let file_index = match self.file_table.find(path) {
            Some(i) => {
                self.file_table.set_mtime(i, mtime);
                i as u32
            }
            None => u32::try_from(self.file_table.append(path.to_string(), mtime))
                .map_err(|_| crate::error::Error::Resource("file table index overflow".into()))?,
        };

        expand::expand_suffix(
            &mut self.bio,
            &mut self.cache,
            &mut self.pool,
            &mut self.arena,
            self.root,
            suffix.as_bytes(),
            file_index,
        )?;
        self.cache.note_mutation();
        self.cache.shrink(&mut self.bio, &self.pool, &mut self.arena, self.root)?;
        self.logger.log("expand", Level::VeryVerbose, &format!("indexed suffix for {path}"));
        Ok(())
    }

    /// Removes every reference to `path`, if indexed.
    pub fn truncate_one(&mut self, path: &str) -> Result<()> {
        let Some(index) = self.file_table.find(path) else {
            return Ok(());
        };
        truncate::truncate_one(
            &mut self.bio,
            &mut self.cache,
            &self.pool,
            &mut self.arena,
            self.root,
            &mut self.file_table,
            index as u32,
        )?;
        self.cache.note_mutation();
        self.cache.shrink(&mut self.bio, &self.pool, &mut self.arena, self.root)
    }

    /// Removes every reference to each path in `paths` in one sweep.
    pub fn truncate_multiple(&mut self, paths: &[String]) -> Result<()> {
        let indices: Vec<usize> = paths.iter().filter_map(|p| self.file_table.find(p)).collect();
        truncate::truncate_multiple(
            &mut self.bio,
            &mut self.cache,
            &self.pool,
            &mut self.arena,
            self.root,
            &mut self.file_table,
            &indices,
        )?;
        self.cache.note_mutation();
        self.cache.shrink(&mut self.bio, &self.pool, &mut self.arena, self.root)
    }

    /// Removes every file for which `still_present` returns `false`.
    pub fn truncate_deleted(&mut self, still_present: impl Fn(&str) -> bool) -> Result<()> {
        truncate::truncate_deleted(
            &mut self.bio,
            &mut self.cache,
            &self.pool,
            &mut self.arena,
            self.root,
            &mut self.file_table,
            still_present,
        )?;
        self.cache.note_mutation();
        self.cache.shrink(&mut self.bio, &self.pool, &mut self.arena, self.root)
    }

    /// Removes every file whose recorded mtime no longer matches what
    /// `current_mtime` reports (including files that vanished, signaled
    /// by `None`).
    pub fn truncate_modified(&mut self, current_mtime: impl Fn(&str) -> Option<u32>) -> Result<()> {
        truncate::truncate_modified(
            &mut self.bio,
            &mut self.cache,
            &self.pool,
            &mut self.arena,
            self.root,
            &mut self.file_table,
            current_mtime,
        )?;
        self.cache.note_mutation();
        self.cache.shrink(&mut self.bio, &self.pool, &mut self.arena, self.root)
    }

    fn check_needle_len(&self, needle: &[u8]) -> Result<()> {
        let max = self.config.max_needle_len();
        if needle.len() > max {
            return Err(UsageError::NeedleTooLong { len: needle.len(), max }.into());
        }
        Ok(())
    }

    /// Exact substring search; rejects needles past the configured hard
    /// cap rather than walking the tree at all.
    pub fn search(&mut self, needle: &[u8], callback: impl FnMut(u32)) -> Result<usize> {
        self.check_needle_len(needle)?;
        search::search(&mut self.bio, &mut self.cache, &self.pool, &mut self.arena, self.root, needle, callback)
    }

    /// Approximate (bounded edit-distance) substring search.
    pub fn search_approx(
        &mut self,
        budget: u32,
        ignore_case: bool,
        needle: &[u8],
        callback: impl FnMut(u32),
    ) -> Result<usize> {
        self.check_needle_len(needle)?;
        search::search_approx(
            &mut self.bio,
            &mut self.cache,
            &self.pool,
            &mut self.arena,
            self.root,
            budget,
            ignore_case,
            needle,
            callback,
        )
    }

    /// Debug-prints the tree: each label indented under its parent,
    /// followed by the paths of any files matched at that node.
    pub fn dump(&mut self, out: &mut impl std::io::Write) -> Result<()> {
        let child = self.arena.get(self.root).child;
        self.dump_chain(out, child, 2)
    }

    fn dump_chain(&mut self, out: &mut impl std::io::Write, node: Option<NodeId>, indent: usize) -> Result<()> {
        let Some(mut cur) = node else {
            return Ok(());
        };
        loop {
            let label = self.arena.get(cur).label.to_vec(&self.pool);
            writeln!(out, "{:indent$}{}:", "", String::from_utf8_lossy(&label))?;
            let matches = self.arena.get(cur).matches.clone();
            for m in matches {
                if let Some(entry) = self.file_table.get(m as usize) {
                    writeln!(out, "{:indent$}  {}", "", entry.path)?;
                }
            }
            let child = first_child(&mut self.bio, &mut self.cache, &mut self.arena, cur)?;
            self.dump_chain(out, child, indent + 2)?;
            match next_sibling(&mut self.cache, &mut self.bio, &mut self.arena, cur)? {
                Some(next) => cur = next,
                None => break,
            }
        }
        Ok(())
    }
}

/// Recursively faults in every evicted child/link edge under `head`
/// from `bio`, so a subsequent full dump to a *different* file never
/// needs to read from this one.
fn hydrate_subtree(bio: &mut BufferedIo, cache: &mut Cache, arena: &mut Arena, head: NodeId) -> Result<()> {
    let mls_size = arena.get(head).mls_size;
    for s in 0..mls_size {
        let slot = head.offset(u32::from(s));
        if arena.get(slot).child.is_none() && arena.get(slot).next_off != 0 {
            cache.load_child(bio, arena, slot)?;
        }
        if let Some(child) = arena.get(slot).child {
            hydrate_subtree(bio, cache, arena, child)?;
        }
    }
    let last = head.offset(u32::from(mls_size - 1));
    if arena.get(last).link.is_none() && arena.get(last).link_off != 0 {
        cache.load_link(bio, arena, last)?;
    }
    if let Some(link) = arena.get(last).link {
        hydrate_subtree(bio, cache, arena, link)?;
    }
    Ok(())
}

fn stat_mtime(path: &str) -> Result<u32> {
    let meta = std::fs::metadata(path)?;
    let modified = meta.modified()?;
    let secs = modified.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    Ok(secs as u32)
}
