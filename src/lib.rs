// Copyright (c) 2024-present, subdex
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A persistent, full-text **substring index**: a generalized suffix
//! tree over every suffix of every keyword you `expand` into it, with
//! a byte-exact on-disk format, bounded-memory eviction so a corpus far
//! larger than RAM can still be indexed, and exact and approximate
//! (bounded edit-distance) substring search.
//!
//! [`SuffixTreeEngine::expand`] inserts exactly one suffix per call, so
//! indexing a whole keyword for substring search means looping over its
//! own suffixes the way a caller like `doodle`'s `buildIndex` does.
//!
//! # Example
//!
//! ```
//! use subdex::Config;
//! # let dir = tempfile::tempdir()?;
//! # let source = dir.path().join("report.txt");
//! # std::fs::write(&source, b"placeholder")?;
//! # let db_path = dir.path().join("index.db");
//!
//! let mut engine = Config::new().open_rw(&db_path)?;
//! let keyword = "quarterly-report";
//! for start in 0..keyword.len() {
//!     engine.expand(&keyword[start..], source.to_str().unwrap())?;
//! }
//!
//! let mut hits = Vec::new();
//! engine.search(b"report", |file_index| hits.push(file_index))?;
//! assert_eq!(hits.len(), 1);
//!
//! engine.close()?;
//! # Ok::<(), subdex::Error>(())
//! ```
//!
//! What this crate does **not** do: rank or score results, parse
//! boolean queries, walk directories, extract keywords from files, or
//! coordinate multiple writers. Those are the caller's job; this crate
//! is the indexing engine underneath them.

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod coding;
pub mod config;
pub mod engine;
pub mod error;
pub mod expand;
pub mod file_table;
pub mod io;
pub mod lock;
pub mod logger;
pub mod node;
pub mod persist;
pub mod pool;
pub mod search;
pub mod truncate;

pub use config::Config;
pub use engine::SuffixTreeEngine;
pub use error::{Error, Result};
pub use file_table::FileEntry;
pub use logger::{Level, Logger, StdLogger};
