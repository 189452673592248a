// Copyright (c) 2024-present, subdex
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Advisory file-region locking taken on open and released on close
//! (spec.md §5): exclusive for read-write, shared for read-only.
//!
//! Held for the lifetime of the engine, the way `flock(2)` locks are
//! normally used -- not per-operation. A second process attempting an
//! incompatible lock on the same database file gets a prompt `IoError`
//! rather than blocking.

use fs2::FileExt;
use std::fs::File;
use crate::Result;

/// Takes an exclusive lock, failing immediately if another process
/// already holds any lock on the file.
pub fn lock_exclusive(file: &File) -> Result<()> {
    file.try_lock_exclusive()?;
    Ok(())
}

/// Takes a shared lock, failing immediately if another process holds
/// an exclusive lock on the file.
pub fn lock_shared(file: &File) -> Result<()> {
    file.try_lock_shared()?;
    Ok(())
}

/// Releases whatever lock this handle holds.
pub fn unlock(file: &File) -> Result<()> {
    FileExt::unlock(file)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_lock_round_trips() {
        let file = tempfile::tempfile().unwrap();
        lock_exclusive(&file).unwrap();
        unlock(&file).unwrap();
    }

    #[test]
    fn shared_lock_round_trips() {
        let file = tempfile::tempfile().unwrap();
        lock_shared(&file).unwrap();
        unlock(&file).unwrap();
    }
}
