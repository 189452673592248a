// Copyright (c) 2024-present, subdex
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The logging collaborator interface.
//!
//! The original engine calls back into a caller-supplied
//! `DOODLE_Logger(context, level, message, ...)` before returning most
//! errors. This crate keeps that as a trait so a caller can still wire
//! up its own transport, but ships a default, [`StdLogger`], that
//! forwards to the `log` facade the way the rest of this crate's ambient
//! stack does.

/// Severity of a logged event, mirroring the original's four levels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    /// An error the caller should treat as fatal to the current operation.
    Critical,
    /// Normal operational notices (open, close, eviction runs).
    Verbose,
    /// Per-call detail (one line per `expand`/`truncate`/search).
    VeryVerbose,
    /// Per-node tracing, only useful while debugging the engine itself.
    InsanelyVerbose,
}

/// A context-carrying logging collaborator.
pub trait Logger {
    /// Records one event. `context` names the operation or subsystem
    /// that produced it (e.g. `"expand"`, `"cache"`).
    fn log(&self, context: &str, level: Level, message: &str);
}

/// Forwards every level to the matching `log` crate macro, prefixing
/// the message with its context.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdLogger;

impl Logger for StdLogger {
    fn log(&self, context: &str, level: Level, message: &str) {
        match level {
            Level::Critical => log::error!(target: "subdex", "{context}: {message}"),
            Level::Verbose => log::info!(target: "subdex", "{context}: {message}"),
            Level::VeryVerbose => log::debug!(target: "subdex", "{context}: {message}"),
            Level::InsanelyVerbose => log::trace!(target: "subdex", "{context}: {message}"),
        }
    }
}
