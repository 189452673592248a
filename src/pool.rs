// Copyright (c) 2024-present, subdex
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The interned-string pool (component C2): keyword bodies and shared
//! path prefixes live here once, and tree nodes refer back into it by
//! `(pool_index, offset)` instead of owning their own copy of a label.

/// A growable sequence of owned byte strings, addressed by index.
#[derive(Default)]
pub struct Pool {
    entries: Vec<Box<[u8]>>,
}

impl Pool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Borrows entry `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> &[u8] {
        &self.entries[index]
    }

    /// Appends a new entry, returning its index.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        self.entries.push(bytes.into());
        self.entries.len() - 1
    }

    /// Fast path for expansion: if the most recently appended entry
    /// ends with `suffix`, reuse that occurrence instead of growing the
    /// pool.
    #[must_use]
    pub fn last_ends_with(&self, suffix: &[u8]) -> Option<(usize, usize)> {
        let idx = self.entries.len().checked_sub(1)?;
        let entry = &self.entries[idx];
        let offset = entry.len().checked_sub(suffix.len())?;
        (&entry[offset..] == suffix).then_some((idx, offset))
    }

    /// Optional optimization: locate `needle` as a substring inside any
    /// existing pool entry, so expansion can avoid growing the pool for
    /// keywords that already occur inside a longer one.
    #[must_use]
    pub fn find_substring(&self, needle: &[u8]) -> Option<(usize, usize)> {
        if needle.is_empty() {
            return None;
        }
        self.entries.iter().enumerate().find_map(|(i, entry)| {
            find_subslice(entry, needle).map(|offset| (i, offset))
        })
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_get() {
        let mut pool = Pool::new();
        let i = pool.append(b"keyword");
        assert_eq!(pool.get(i), b"keyword");
    }

    #[test]
    fn last_ends_with_reuses_suffix() {
        let mut pool = Pool::new();
        pool.append(b"abcdefg");
        let (idx, off) = pool.last_ends_with(b"efg").unwrap();
        assert_eq!(idx, 0);
        assert_eq!(&pool.get(idx)[off..], b"efg");
        assert!(pool.last_ends_with(b"xyz").is_none());
    }

    #[test]
    fn find_substring_locates_internal_occurrence() {
        let mut pool = Pool::new();
        pool.append(b"1998-foo");
        pool.append(b"1998,2000");
        let (idx, off) = pool.find_substring(b"998").unwrap();
        assert_eq!(idx, 0);
        assert_eq!(off, 1);
    }
}
