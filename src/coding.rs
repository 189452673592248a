// Copyright (c) 2024-present, subdex
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The variable-length integer encodings used by the database file.
//!
//! All of them share one shape: a length prefix naming how many
//! big-endian bytes follow. This keeps small values (the overwhelming
//! majority of offsets and indices in a suffix tree) cheap to store
//! without capping anything at a fixed width.

use crate::error::{FormatError, Result};
use std::io::{Read, Write};

fn bytes_needed_u32(val: u32) -> u8 {
    let mut v = val;
    let mut n = 0;
    while v > 0 {
        v >>= 8;
        n += 1;
    }
    n
}

fn bytes_needed_u64(val: u64) -> u8 {
    let mut v = val;
    let mut n = 0;
    while v > 0 {
        v >>= 8;
        n += 1;
    }
    n
}

/// Writes a `uint`: one length byte in `[0, 4]`, then that many
/// big-endian bytes.
pub fn write_uint<W: Write>(w: &mut W, val: u32) -> Result<()> {
    let n = bytes_needed_u32(val);
    w.write_all(&[n])?;
    w.write_all(&val.to_be_bytes()[4 - n as usize..])?;
    Ok(())
}

/// Reads a `uint`. Fails with [`FormatError::LengthByteOutOfRange`] if
/// the length byte is not in `[0, 4]`.
pub fn read_uint<R: Read>(r: &mut R) -> Result<u32> {
    let mut lenbuf = [0u8; 1];
    r.read_exact(&mut lenbuf)?;
    let n = lenbuf[0];
    if n > 4 {
        return Err(FormatError::LengthByteOutOfRange {
            max: 4,
            got: i16::from(n),
        }
        .into());
    }
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf[4 - n as usize..])?;
    Ok(u32::from_be_bytes(buf))
}

/// Writes a `ulong`: one length byte in `[0, 8]`, then that many
/// big-endian bytes.
pub fn write_ulong<W: Write>(w: &mut W, val: u64) -> Result<()> {
    let n = bytes_needed_u64(val);
    w.write_all(&[n])?;
    w.write_all(&val.to_be_bytes()[8 - n as usize..])?;
    Ok(())
}

/// Reads a `ulong`. Fails with [`FormatError::LengthByteOutOfRange`] if
/// the length byte is not in `[0, 8]`.
pub fn read_ulong<R: Read>(r: &mut R) -> Result<u64> {
    let mut lenbuf = [0u8; 1];
    r.read_exact(&mut lenbuf)?;
    let n = lenbuf[0];
    if n > 8 {
        return Err(FormatError::LengthByteOutOfRange {
            max: 8,
            got: i16::from(n),
        }
        .into());
    }
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf[8 - n as usize..])?;
    Ok(u64::from_be_bytes(buf))
}

/// Writes a `uint-pair(a, b)`: one byte whose high nibble is the byte
/// count of `a` and low nibble the byte count of `b`, then `b`'s bytes,
/// then `a`'s bytes.
pub fn write_uint_pair<W: Write>(w: &mut W, a: u32, b: u32) -> Result<()> {
    let na = bytes_needed_u32(a);
    let nb = bytes_needed_u32(b);
    w.write_all(&[(na << 4) | nb])?;
    w.write_all(&b.to_be_bytes()[4 - nb as usize..])?;
    w.write_all(&a.to_be_bytes()[4 - na as usize..])?;
    Ok(())
}

/// Reads a `uint-pair`, returning `(a, b)`.
pub fn read_uint_pair<R: Read>(r: &mut R) -> Result<(u32, u32)> {
    let mut tag = [0u8; 1];
    r.read_exact(&mut tag)?;
    let na = tag[0] >> 4;
    let nb = tag[0] & 0x0F;
    if na > 4 || nb > 4 {
        return Err(FormatError::LengthByteOutOfRange {
            max: 4,
            got: i16::from(tag[0]),
        }
        .into());
    }
    let mut bbuf = [0u8; 4];
    r.read_exact(&mut bbuf[4 - nb as usize..])?;
    let b = u32::from_be_bytes(bbuf);
    let mut abuf = [0u8; 4];
    r.read_exact(&mut abuf[4 - na as usize..])?;
    let a = u32::from_be_bytes(abuf);
    Ok((a, b))
}

/// Writes a `ulong-pair(a, b)`, nibbles bounded by 8 instead of 4.
pub fn write_ulong_pair<W: Write>(w: &mut W, a: u64, b: u64) -> Result<()> {
    let na = bytes_needed_u64(a);
    let nb = bytes_needed_u64(b);
    w.write_all(&[(na << 4) | nb])?;
    w.write_all(&b.to_be_bytes()[8 - nb as usize..])?;
    w.write_all(&a.to_be_bytes()[8 - na as usize..])?;
    Ok(())
}

/// Reads a `ulong-pair`, returning `(a, b)`.
pub fn read_ulong_pair<R: Read>(r: &mut R) -> Result<(u64, u64)> {
    let mut tag = [0u8; 1];
    r.read_exact(&mut tag)?;
    let na = tag[0] >> 4;
    let nb = tag[0] & 0x0F;
    if na > 8 || nb > 8 {
        return Err(FormatError::LengthByteOutOfRange {
            max: 8,
            got: i16::from(tag[0]),
        }
        .into());
    }
    let mut bbuf = [0u8; 8];
    r.read_exact(&mut bbuf[8 - nb as usize..])?;
    let b = u64::from_be_bytes(bbuf);
    let mut abuf = [0u8; 8];
    r.read_exact(&mut abuf[8 - na as usize..])?;
    let a = u64::from_be_bytes(abuf);
    Ok((a, b))
}

/// Writes a `ulong-full`: eight fixed-width big-endian bytes, used only
/// for the backpatched root-offset header slot.
pub fn write_ulong_full<W: Write>(w: &mut W, val: u64) -> Result<()> {
    w.write_all(&val.to_be_bytes())?;
    Ok(())
}

/// Reads a `ulong-full`.
pub fn read_ulong_full<R: Read>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

/// Writes a `zt-string`: a `uint` length, then that many raw bytes.
pub fn write_zt_string<W: Write>(w: &mut W, bytes: &[u8]) -> Result<()> {
    write_uint(w, bytes.len() as u32)?;
    w.write_all(bytes)?;
    Ok(())
}

/// Reads a `zt-string` into an owned byte vector.
pub fn read_zt_string<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let len = read_uint(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn uint_roundtrip_boundaries() {
        for val in [0u32, 1, 255, 256, 65535, 65536, u32::MAX] {
            let mut buf = vec![];
            write_uint(&mut buf, val).unwrap();
            let mut cur = Cursor::new(buf);
            assert_eq!(read_uint(&mut cur).unwrap(), val);
        }
    }

    #[test]
    fn ulong_roundtrip_boundaries() {
        for val in [0u64, 1, u32::MAX as u64, u32::MAX as u64 + 1, u64::MAX] {
            let mut buf = vec![];
            write_ulong(&mut buf, val).unwrap();
            let mut cur = Cursor::new(buf);
            assert_eq!(read_ulong(&mut cur).unwrap(), val);
        }
    }

    #[test]
    fn uint_pair_roundtrip() {
        let cases = [(0u32, 0u32), (1, 300), (70000, 2), (u32::MAX, u32::MAX)];
        for (a, b) in cases {
            let mut buf = vec![];
            write_uint_pair(&mut buf, a, b).unwrap();
            let mut cur = Cursor::new(buf);
            assert_eq!(read_uint_pair(&mut cur).unwrap(), (a, b));
        }
    }

    #[test]
    fn ulong_pair_roundtrip() {
        let cases = [(0u64, 0u64), (1, u64::MAX), (u32::MAX as u64 + 5, 9)];
        for (a, b) in cases {
            let mut buf = vec![];
            write_ulong_pair(&mut buf, a, b).unwrap();
            let mut cur = Cursor::new(buf);
            assert_eq!(read_ulong_pair(&mut cur).unwrap(), (a, b));
        }
    }

    #[test]
    fn ulong_full_is_fixed_width() {
        let mut buf = vec![];
        write_ulong_full(&mut buf, 42).unwrap();
        assert_eq!(buf.len(), 8);
        let mut cur = Cursor::new(buf);
        assert_eq!(read_ulong_full(&mut cur).unwrap(), 42);
    }

    #[test]
    fn zt_string_roundtrip() {
        let mut buf = vec![];
        write_zt_string(&mut buf, b"hello world").unwrap();
        let mut cur = Cursor::new(buf);
        assert_eq!(read_zt_string(&mut cur).unwrap(), b"hello world");
    }

    #[test]
    fn rejects_out_of_range_length_byte() {
        let mut buf = vec![5u8]; // > 4, invalid for uint
        buf.extend_from_slice(&[0, 0, 0, 0, 0]);
        let mut cur = Cursor::new(buf);
        assert!(matches!(
            read_uint(&mut cur),
            Err(crate::Error::Format(FormatError::LengthByteOutOfRange { .. }))
        ));
    }
}
