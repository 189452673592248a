// Copyright (c) 2024-present, subdex
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Engine configuration, built up the way `lsm-tree::Config` is: a
//! plain struct with chained `with_*` setters, consumed by `open_rw`/
//! `open_ro` to produce a [`SuffixTreeEngine`](crate::engine::SuffixTreeEngine).

use crate::engine::SuffixTreeEngine;
use crate::io::DEFAULT_BUF_SIZE;
use crate::Result;
use std::path::Path;

/// Default node-memory budget (spec.md §4.6).
pub const DEFAULT_MEMORY_LIMIT: usize = 8 * 1024 * 1024;

/// Needle length past which `search`/`search_approx` reject a query
/// outright (spec.md §6: twice the useful maximum).
pub const DEFAULT_MAX_NEEDLE_LEN: usize = 256;

/// Engine configuration builder.
#[derive(Clone, Debug)]
pub struct Config {
    memory_limit: usize,
    buffer_size: usize,
    max_needle_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memory_limit: DEFAULT_MEMORY_LIMIT,
            buffer_size: DEFAULT_BUF_SIZE,
            max_needle_len: DEFAULT_MAX_NEEDLE_LEN,
        }
    }
}

impl Config {
    /// Starts from the defaults (8 MiB node budget, 4096-byte I/O
    /// window, 256-byte needle hard cap).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the node-memory budget enforced by [`crate::cache::Cache`].
    #[must_use]
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = bytes;
        self
    }

    /// Sets the I/O window size used by [`crate::io::BufferedIo`].
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is 2 or fewer (see `BufferedIo::new`).
    #[must_use]
    pub fn with_buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes;
        self
    }

    /// Sets the hard cap past which a search needle is rejected with
    /// `UsageError::NeedleTooLong`.
    #[must_use]
    pub fn with_max_needle_len(mut self, bytes: usize) -> Self {
        self.max_needle_len = bytes;
        self
    }

    #[must_use]
    pub fn memory_limit(&self) -> usize {
        self.memory_limit
    }

    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    #[must_use]
    pub fn max_needle_len(&self) -> usize {
        self.max_needle_len
    }

    /// Opens (creating if necessary) the database at `path` for reading
    /// and writing, taking an exclusive lock for the engine's lifetime.
    pub fn open_rw(self, path: impl AsRef<Path>) -> Result<SuffixTreeEngine> {
        SuffixTreeEngine::open(path.as_ref(), self, true)
    }

    /// Opens the database at `path` read-only, taking a shared lock.
    /// Fails if the database does not already exist.
    pub fn open_ro(self, path: impl AsRef<Path>) -> Result<SuffixTreeEngine> {
        SuffixTreeEngine::open(path.as_ref(), self, false)
    }
}
