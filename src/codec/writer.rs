use std::io::{self, Write};

use flate2::write::GzEncoder;
use flate2::Compression;

use super::{
    write_string, write_varint, EOF_SENTINEL, EXC_AGGREGATED, EXC_FUSION, EXC_INNER, EXC_LOADER,
    EXC_STACK, HAS_EXCEPTION, HAS_LOCATION, HAS_TAGS, HAS_TEXT, STREAM_VERSION,
};
use crate::{EntryData, EntryKind, ExceptionData, LogEntry, LogTime, MulticastEntry, Result};

/// Writes framed entries to a byte stream.
///
/// The caller decides framing boundaries: [`write_header`](Self::write_header)
/// once per stream, any number of entries, then [`finish`](Self::finish) to
/// emit the end-of-file sentinel. Dropping the writer without `finish` leaves
/// a truncated stream, which readers report via `bad_end_of_file`.
#[derive(Debug)]
pub struct EntryWriter<W: Write> {
    out: W,
}

impl<W: Write> EntryWriter<W> {
    pub fn new(out: W) -> EntryWriter<W> {
        EntryWriter { out }
    }

    /// Write the 4-byte little-endian stream version. Once per stream.
    pub fn write_header(&mut self) -> Result<()> {
        self.out.write_all(&STREAM_VERSION.to_le_bytes())?;
        Ok(())
    }

    /// Write an entry without monitor attribution (the pipe protocol form).
    pub fn write_unicast(&mut self, entry: &LogEntry) -> Result<()> {
        self.out
            .write_all(&[tag_byte(entry.kind() as u8, entry.data())])?;
        self.write_payload(entry)
    }

    /// Write an entry with its multicast prefix.
    pub fn write_multicast(&mut self, mc: &MulticastEntry) -> Result<()> {
        let kind = mc.entry.kind() as u8 + EntryKind::MULTICAST_OFFSET;
        self.out.write_all(&[tag_byte(kind, mc.entry.data())])?;
        self.out.write_all(mc.monitor_id.as_bytes())?;
        self.out.write_all(&[mc.prev_kind.map_or(0, |k| k as u8)])?;
        write_time(&mut self.out, mc.prev_time)?;
        write_varint(&mut self.out, mc.depth)?;
        self.write_payload(&mc.entry)
    }

    fn write_payload(&mut self, entry: &LogEntry) -> Result<()> {
        let data = entry.data();
        write_time(&mut self.out, data.time)?;
        self.out.write_all(&data.level.to_bits().to_le_bytes())?;
        if let Some(text) = &data.text {
            write_string(&mut self.out, text)?;
        }
        if let Some(tags) = &data.tags {
            write_string(&mut self.out, &tags.to_canonical())?;
        }
        if let Some(file) = &data.source_file {
            write_string(&mut self.out, file)?;
            write_varint(&mut self.out, u64::from(data.source_line.unwrap_or(0)))?;
        }
        if let Some(exception) = &data.exception {
            write_exception(&mut self.out, exception)?;
        }
        if let LogEntry::CloseGroup { conclusions, .. } = entry {
            write_varint(&mut self.out, conclusions.len() as u64)?;
            for conclusion in conclusions {
                write_string(&mut self.out, conclusion)?;
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    /// Emit the end-of-file sentinel, flush, and hand the stream back.
    pub fn finish(mut self) -> Result<W> {
        self.out.write_all(&[EOF_SENTINEL])?;
        self.out.flush()?;
        Ok(self.out)
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.out
    }
}

fn tag_byte(kind: u8, data: &EntryData) -> u8 {
    let mut tag = kind;
    if data.text.is_some() {
        tag |= HAS_TEXT;
    }
    if data.tags.is_some() {
        tag |= HAS_TAGS;
    }
    if data.source_file.is_some() {
        tag |= HAS_LOCATION;
    }
    if data.exception.is_some() {
        tag |= HAS_EXCEPTION;
    }
    tag
}

pub(crate) fn write_time<W: Write>(out: &mut W, time: LogTime) -> io::Result<()> {
    out.write_all(&time.nanos().to_le_bytes())?;
    out.write_all(&[time.uniquifier()])
}

fn write_exception<W: Write>(out: &mut W, e: &ExceptionData) -> io::Result<()> {
    write_string(out, &e.message)?;
    write_string(out, &e.type_name)?;
    let mut flags = 0u8;
    if e.stack_trace.is_some() {
        flags |= EXC_STACK;
    }
    if e.inner.is_some() {
        flags |= EXC_INNER;
    }
    if e.aggregated.is_some() {
        flags |= EXC_AGGREGATED;
    }
    if e.loader_exceptions.is_some() {
        flags |= EXC_LOADER;
    }
    if e.fusion_log.is_some() {
        flags |= EXC_FUSION;
    }
    out.write_all(&[flags])?;
    if let Some(stack) = &e.stack_trace {
        write_string(out, stack)?;
    }
    if let Some(inner) = &e.inner {
        write_exception(out, inner)?;
    }
    if let Some(aggregated) = &e.aggregated {
        write_varint(out, aggregated.len() as u64)?;
        for item in aggregated {
            write_exception(out, item)?;
        }
    }
    if let Some(loader) = &e.loader_exceptions {
        write_varint(out, loader.len() as u64)?;
        for item in loader {
            write_exception(out, item)?;
        }
    }
    if let Some(fusion) = &e.fusion_log {
        write_string(out, fusion)?;
    }
    Ok(())
}

/// The gzip encoder every binary writer in the crate uses.
///
/// Default compression, no filename, zero mtime: the settings are part of
/// the file format, so recompressing a raw stream with them reproduces a
/// dispatcher-written gzip file byte for byte.
pub fn gzip_encoder<W: Write>(out: W) -> GzEncoder<W> {
    GzEncoder::new(out, Compression::default())
}
