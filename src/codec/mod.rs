//! Framed binary persistence of log entries.
//!
//! A stream is: a 4-byte little-endian version header, a sequence of
//! tag-byte-prefixed entries, and a single zero byte as the end-of-file
//! sentinel. The tag byte carries the entry kind in its low nibble and a
//! present-fields bitmap in its high nibble; multicast kinds are the unicast
//! kinds offset by 3. Lengths, counts and group depths are LEB128 varints.
//!
//! Gzip files are the same byte stream wrapped in a standard gzip encoder
//! with deterministic settings ([`writer::gzip_encoder`]); readers
//! auto-detect the gzip magic.

use std::io::{self, Read, Write};

mod reader;
mod writer;

pub use reader::{EntryReader, ReadEntry};
pub use writer::{gzip_encoder, EntryWriter};

/// Version written in the 4-byte stream header.
pub const STREAM_VERSION: u32 = 1;

/// A single zero byte closing a gracefully ended stream.
pub(crate) const EOF_SENTINEL: u8 = 0;

pub(crate) const KIND_MASK: u8 = 0x0F;
pub(crate) const HAS_TEXT: u8 = 0x10;
pub(crate) const HAS_TAGS: u8 = 0x20;
pub(crate) const HAS_LOCATION: u8 = 0x40;
pub(crate) const HAS_EXCEPTION: u8 = 0x80;

pub(crate) const EXC_STACK: u8 = 0x01;
pub(crate) const EXC_INNER: u8 = 0x02;
pub(crate) const EXC_AGGREGATED: u8 = 0x04;
pub(crate) const EXC_LOADER: u8 = 0x08;
pub(crate) const EXC_FUSION: u8 = 0x10;

pub(crate) const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Strings and lists above this length are treated as corruption.
const MAX_LENGTH: u64 = 1 << 26;

pub(crate) fn write_varint<W: Write>(out: &mut W, mut value: u64) -> io::Result<()> {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            return out.write_all(&[byte]);
        }
        out.write_all(&[byte | 0x80])?;
    }
}

pub(crate) fn read_varint<R: Read>(input: &mut R) -> io::Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let mut byte = [0u8; 1];
        input.read_exact(&mut byte)?;
        if shift == 63 && byte[0] > 1 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "varint overflows 64 bits",
            ));
        }
        value |= u64::from(byte[0] & 0x7F) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 63 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "varint longer than 10 bytes",
            ));
        }
    }
}

pub(crate) fn write_string<W: Write>(out: &mut W, s: &str) -> io::Result<()> {
    write_varint(out, s.len() as u64)?;
    out.write_all(s.as_bytes())
}

pub(crate) fn read_string<R: Read>(input: &mut R) -> io::Result<String> {
    let len = read_varint(input)?;
    if len > MAX_LENGTH {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("string length {len} exceeds the stream limit"),
        ));
    }
    let mut bytes = vec![0u8; len as usize];
    input.read_exact(&mut bytes)?;
    String::from_utf8(bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("invalid UTF-8: {e}")))
}

pub(crate) fn read_count<R: Read>(input: &mut R) -> io::Result<usize> {
    let count = read_varint(input)?;
    if count > MAX_LENGTH {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("count {count} exceeds the stream limit"),
        ));
    }
    Ok(count as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn varint_round_trips_at_the_boundaries() {
        for value in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value).unwrap();
            assert_eq!(read_varint(&mut Cursor::new(&buf)).unwrap(), value);
        }
    }

    #[test]
    fn varint_rejects_overlong_encodings() {
        // Eleven continuation bytes can never be a valid u64.
        let bytes = [0xFFu8; 11];
        assert!(read_varint(&mut Cursor::new(&bytes[..])).is_err());
    }

    #[test]
    fn string_round_trips() {
        let mut buf = Vec::new();
        write_string(&mut buf, "héllo wörld").unwrap();
        assert_eq!(read_string(&mut Cursor::new(&buf)).unwrap(), "héllo wörld");
    }

    #[test]
    fn string_rejects_invalid_utf8() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 2).unwrap();
        buf.extend_from_slice(&[0xC0, 0xAF]);
        assert!(read_string(&mut Cursor::new(&buf)).is_err());
    }
}
