// Copyright (c) 2024-present, subdex
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Buffered, windowed I/O over a single file descriptor (component C1).
//!
//! This is deliberately not a thin wrapper around [`std::io::BufReader`]/
//! [`BufWriter`](std::io::BufWriter): the database format relies on
//! specific windowing behavior (read-ahead alignment, a single dirty
//! region, large transfers bypassing the buffer) that the stdlib
//! buffered adapters don't provide and don't promise.

use std::fs::File;
use std::io::{Read as _, Seek, SeekFrom, Write as _};

/// Default window size. Must exceed 2 (the read-alignment arithmetic
/// divides it by two).
pub const DEFAULT_BUF_SIZE: usize = 4096;

/// A windowed buffer over a file, matching the engine's I/O access
/// pattern: mostly small sequential reads/writes of tree-node fields,
/// occasionally large transfers (the CI-cache-free full dump) that
/// should go straight to the OS instead of being staged.
pub struct BufferedIo {
    file: File,
    /// Logical position a caller-visible read/write/seek operates at.
    off: u64,
    /// Size of the file as far as this handle knows (grows with writes).
    fsize: u64,
    /// File offset the in-memory window starts at.
    bstart: u64,
    /// Number of valid bytes in the window (read side).
    bsize: usize,
    buffer: Vec<u8>,
    /// Number of bytes from `bstart` that are dirty and must be flushed.
    dirty: usize,
    buf_size: usize,
}

impl BufferedIo {
    /// Wraps `file`. `buf_size` must be greater than 2.
    pub fn new(file: File, buf_size: usize) -> crate::Result<Self> {
        assert!(buf_size > 2, "buffer size must exceed 2 bytes");
        let fsize = file.metadata()?.len();
        Ok(Self {
            file,
            off: 0,
            fsize,
            bstart: 0,
            bsize: 0,
            buffer: vec![0u8; buf_size],
            dirty: 0,
            buf_size,
        })
    }

    /// Opens with the engine's default 4096-byte window.
    pub fn with_defaults(file: File) -> crate::Result<Self> {
        Self::new(file, DEFAULT_BUF_SIZE)
    }

    fn flush_buffer(&mut self) -> crate::Result<()> {
        if self.dirty > 0 {
            self.file.seek(SeekFrom::Start(self.bstart))?;
            #[allow(clippy::indexing_slicing)]
            self.file.write_all(&self.buffer[..self.dirty])?;
            self.dirty = 0;
        }
        Ok(())
    }

    /// Re-centers the read window around `off` (rounding down to align
    /// reads to half the buffer size when the requested range still
    /// fits), flushing any pending writes first.
    fn retarget(&mut self, off: u64, len: usize) -> crate::Result<()> {
        let half = (self.buf_size / 2) as u64;
        let aligned = (off / half) * half;
        let off = if aligned + self.buf_size as u64 >= off + len as u64 {
            aligned
        } else {
            off
        };
        self.flush_buffer()?;
        let remaining = self.fsize.saturating_sub(off);
        let window = remaining.min(self.buf_size as u64) as usize;
        self.file.seek(SeekFrom::Start(off))?;
        #[allow(clippy::indexing_slicing)]
        self.file.read_exact(&mut self.buffer[..window])?;
        self.bstart = off;
        self.bsize = window;
        Ok(())
    }

    /// Reads exactly `buf.len()` bytes at the current logical offset.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> crate::Result<()> {
        let len = buf.len();
        if len > self.buf_size {
            self.flush_buffer()?;
            self.file.seek(SeekFrom::Start(self.off))?;
            self.file.read_exact(buf)?;
            self.off += len as u64;
            return Ok(());
        }
        if self.off < self.bstart || self.off + len as u64 > self.bstart + self.bsize as u64 {
            self.retarget(self.off, len)?;
        }
        if self.off < self.bstart || self.off + len as u64 > self.bstart + self.bsize as u64 {
            return Err(crate::error::FormatError::InvariantViolation(
                "read past end of file",
            )
            .into());
        }
        let start = (self.off - self.bstart) as usize;
        #[allow(clippy::indexing_slicing)]
        buf.copy_from_slice(&self.buffer[start..start + len]);
        self.off += len as u64;
        Ok(())
    }

    /// Writes `buf` at the current logical offset.
    pub fn write_all(&mut self, buf: &[u8]) -> crate::Result<()> {
        let len = buf.len();
        if len > self.buf_size {
            self.flush_buffer()?;
            self.file.seek(SeekFrom::Start(self.off))?;
            self.file.write_all(buf)?;
            self.off += len as u64;
            if self.off > self.fsize {
                self.fsize = self.off;
            }
            return Ok(());
        }
        let contiguous = self.off == self.bstart + self.dirty as u64;
        if self.off < self.bstart || !contiguous || self.off + len as u64 > self.bstart + self.buf_size as u64 {
            self.flush_buffer()?;
            self.bstart = self.off;
            // The buffer's read window no longer describes anything: its
            // bytes past what we're about to write are leftover content
            // from whatever `bstart` used to be. Forget it so a read that
            // falls in this range retargets (and so re-reads from disk)
            // instead of reinterpreting stale bytes under the new offset.
            self.bsize = 0;
        }
        let start = (self.off - self.bstart) as usize;
        #[allow(clippy::indexing_slicing)]
        self.buffer[start..start + len].copy_from_slice(buf);
        self.dirty = start + len;
        self.off += len as u64;
        if self.off > self.fsize {
            self.fsize = self.off;
        }
        Ok(())
    }

    /// Seeks; any seek landing outside the current dirty region flushes
    /// first.
    pub fn seek(&mut self, pos: SeekFrom) -> crate::Result<u64> {
        let target = match pos {
            SeekFrom::Start(off) => off,
            SeekFrom::End(_) => self.fsize,
            SeekFrom::Current(delta) => (self.off as i64 + delta).max(0) as u64,
        };
        if target < self.bstart || target > self.bstart + self.dirty as u64 {
            self.flush_buffer()?;
        }
        self.off = target;
        Ok(self.off)
    }

    /// Flushes any pending write.
    pub fn flush(&mut self) -> crate::Result<()> {
        self.flush_buffer()
    }

    /// Current logical size of the file.
    pub fn len(&self) -> u64 {
        self.fsize
    }

    /// Whether the file is empty.
    pub fn is_empty(&self) -> bool {
        self.fsize == 0
    }

    /// Current logical offset.
    pub fn position(&self) -> u64 {
        self.off
    }

    /// Borrows the underlying file (for `sync_all`/locking).
    pub fn file(&self) -> &File {
        &self.file
    }
}

fn to_io_error(e: crate::Error) -> std::io::Error {
    std::io::Error::other(e)
}

// The coding layer is written against `std::io::Read`/`Write` so the same
// encode/decode functions work over a `Cursor` in tests and over the
// windowed buffer in the real engine.
impl std::io::Read for BufferedIo {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = self.fsize.saturating_sub(self.off);
        let n = (buf.len() as u64).min(remaining) as usize;
        if n == 0 {
            return Ok(0);
        }
        #[allow(clippy::indexing_slicing)]
        self.read_exact(&mut buf[..n]).map_err(to_io_error)?;
        Ok(n)
    }
}

impl std::io::Write for BufferedIo {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.write_all(buf).map_err(to_io_error)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        BufferedIo::flush(self).map_err(to_io_error)
    }
}
