// Copyright (c) 2024-present, subdex
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::fmt;

/// A violation of the on-disk format: bad magic, an out-of-range length
/// byte, an index that does not fit the table it indexes into, or a
/// violated tree invariant caught by a debug check.
#[derive(Debug)]
pub enum FormatError {
    /// The 8-byte magic at the start of the file matched neither the
    /// live magic nor the "tragic" in-progress marker.
    BadMagic,
    /// A `uint`/`ulong`/pair length nibble exceeded its allowed range.
    LengthByteOutOfRange {
        /// Maximum number of bytes the encoding allows (4 or 8).
        max: u8,
        /// The length byte actually read.
        got: i16,
    },
    /// A path-table or file-table index referenced a slot that does
    /// not exist.
    IndexOutOfRange {
        /// The index that was read.
        index: u64,
        /// The number of entries in the table it was supposed to index.
        bound: u64,
    },
    /// A tree invariant (sibling ordering, MLS well-formedness, ...)
    /// was violated; only raised when debug assertions are enabled.
    InvariantViolation(&'static str),
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "database magic does not match"),
            Self::LengthByteOutOfRange { max, got } => {
                write!(f, "length byte {got} out of range [0, {max}]")
            }
            Self::IndexOutOfRange { index, bound } => {
                write!(f, "index {index} out of range (table has {bound} entries)")
            }
            Self::InvariantViolation(what) => write!(f, "tree invariant violated: {what}"),
        }
    }
}

impl std::error::Error for FormatError {}

/// A caller-side mistake detected above the on-disk/in-memory engine
/// boundary, before any I/O is attempted.
#[derive(Debug)]
pub enum UsageError {
    /// `expand` was called with an empty keyword.
    EmptyKeyword,
    /// A search string exceeded the hard cap (twice the useful maximum).
    NeedleTooLong {
        /// Length of the rejected needle.
        len: usize,
        /// The configured hard cap.
        max: usize,
    },
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyKeyword => write!(f, "keyword must not be empty"),
            Self::NeedleTooLong { len, max } => {
                write!(f, "search string of {len} bytes exceeds the {max}-byte limit")
            }
        }
    }
}

impl std::error::Error for UsageError {}

/// Top-level error type for the suffix tree engine.
#[derive(Debug)]
pub enum Error {
    /// A syscall (read, write, seek, stat, lock, rename, unlink) failed.
    Io(std::io::Error),
    /// The on-disk data violates a structural constraint.
    Format(FormatError),
    /// The caller passed invalid arguments.
    Usage(UsageError),
    /// Allocation failed; treated as fatal, matching the original engine's
    /// behavior of aborting rather than trying to run in a degraded mode.
    Resource(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Format(e) => write!(f, "format error: {e}"),
            Self::Usage(e) => write!(f, "usage error: {e}"),
            Self::Resource(msg) => write!(f, "resource error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Format(e) => Some(e),
            Self::Usage(e) => Some(e),
            Self::Resource(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<FormatError> for Error {
    fn from(value: FormatError) -> Self {
        Self::Format(value)
    }
}

impl From<UsageError> for Error {
    fn from(value: UsageError) -> Self {
        Self::Usage(value)
    }
}

/// Engine-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
