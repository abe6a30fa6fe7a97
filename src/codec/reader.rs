use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use flate2::read::GzDecoder;

use super::{
    read_count, read_string, read_varint, EOF_SENTINEL, EXC_AGGREGATED, EXC_FUSION, EXC_INNER,
    EXC_LOADER, EXC_STACK, GZIP_MAGIC, HAS_EXCEPTION, HAS_LOCATION, HAS_TAGS, HAS_TEXT, KIND_MASK,
    STREAM_VERSION,
};
use crate::{
    EntryData, EntryKind, Error, ExceptionData, LogEntry, LogLevel, LogTime, MonitorId,
    MulticastEntry, Result, TagSet,
};

/// Tracks the uncompressed-stream position so entry offsets are exact.
struct CountingReader<R: Read> {
    inner: R,
    pos: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    Fresh,
    Reading,
    End,
    Corrupt,
}

/// One decoded entry, in whichever form the stream carried it.
#[derive(Debug, Clone)]
pub enum ReadEntry {
    Unicast(LogEntry),
    Multicast(MulticastEntry),
}

impl ReadEntry {
    pub fn entry(&self) -> &LogEntry {
        match self {
            ReadEntry::Unicast(entry) => entry,
            ReadEntry::Multicast(mc) => &mc.entry,
        }
    }

    pub fn multicast(&self) -> Option<&MulticastEntry> {
        match self {
            ReadEntry::Unicast(_) => None,
            ReadEntry::Multicast(mc) => Some(mc),
        }
    }

    pub fn time(&self) -> LogTime {
        self.entry().time()
    }
}

/// Forward iterator over one framed stream.
///
/// `Fresh → Reading → (End | Corrupt)`. A decode failure captures the error
/// ([`read_error`](Self::read_error)) and stops the iteration; everything
/// decoded before the failure stays available to the caller. Reaching the
/// end of input without the sentinel sets
/// [`bad_end_of_file`](Self::bad_end_of_file) instead — a truncated tail is
/// tolerated, not fatal.
pub struct EntryReader<R: Read = Box<dyn Read + Send>> {
    input: CountingReader<R>,
    state: ReaderState,
    current: Option<ReadEntry>,
    current_offset: u64,
    bad_eof: bool,
    error: Option<Error>,
    version: u32,
}

impl<R: Read> EntryReader<R> {
    /// Read the stream header from `input` and start fresh.
    pub fn new(input: R) -> Result<EntryReader<R>> {
        let mut counting = CountingReader {
            inner: input,
            pos: 0,
        };
        let mut header = [0u8; 4];
        counting.read_exact(&mut header)?;
        let version = u32::from_le_bytes(header);
        if version != STREAM_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        Ok(EntryReader {
            input: counting,
            state: ReaderState::Fresh,
            current: None,
            current_offset: 0,
            bad_eof: false,
            error: None,
            version,
        })
    }

    /// Resume mid-stream: `input` must already be positioned on a tag byte
    /// whose uncompressed-stream offset is `offset`.
    pub fn resume(input: R, offset: u64, version: u32) -> EntryReader<R> {
        EntryReader {
            input: CountingReader {
                inner: input,
                pos: offset,
            },
            state: ReaderState::Reading,
            current: None,
            current_offset: offset,
            bad_eof: false,
            error: None,
            version,
        }
    }

    /// Advance to the next entry. Returns `false` at the end of the stream
    /// and forever after a decode failure.
    pub fn move_next(&mut self) -> bool {
        match self.state {
            ReaderState::End | ReaderState::Corrupt => return false,
            ReaderState::Fresh | ReaderState::Reading => {}
        }
        self.state = ReaderState::Reading;
        let offset = self.input.pos;

        let mut tag = [0u8; 1];
        if let Err(e) = self.input.read_exact(&mut tag) {
            self.current = None;
            if e.kind() == io::ErrorKind::UnexpectedEof {
                self.bad_eof = true;
                self.state = ReaderState::End;
            } else {
                self.state = ReaderState::Corrupt;
                self.error = Some(Error::codec(offset, e.to_string()));
            }
            return false;
        }
        if tag[0] == EOF_SENTINEL {
            self.current = None;
            self.state = ReaderState::End;
            return false;
        }

        match parse_entry(&mut self.input, tag[0]) {
            Ok(entry) => {
                self.current_offset = offset;
                self.current = Some(entry);
                true
            }
            Err(e) => {
                self.current = None;
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    // Truncated tail: keep what was read, no sentinel seen.
                    self.bad_eof = true;
                    self.state = ReaderState::End;
                } else {
                    self.state = ReaderState::Corrupt;
                    self.error = Some(Error::codec(offset, e.to_string()));
                }
                false
            }
        }
    }

    /// The last entry parsed by a successful [`move_next`](Self::move_next).
    pub fn current(&self) -> Option<&ReadEntry> {
        self.current.as_ref()
    }

    /// Byte offset of the current entry's tag byte in the uncompressed
    /// stream.
    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }

    /// `true` when the input ended without the end-of-file sentinel.
    pub fn bad_end_of_file(&self) -> bool {
        self.bad_eof
    }

    /// The decode error that moved the reader to its corrupt state, if any.
    pub fn read_error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

impl EntryReader<Box<dyn Read + Send>> {
    /// Open a file, auto-detecting gzip by its magic bytes, and read the
    /// stream header.
    pub fn open_path(path: impl AsRef<Path>) -> Result<EntryReader<Box<dyn Read + Send>>> {
        let file = File::open(path)?;
        EntryReader::new(open_stream(file)?)
    }

    /// Open a file positioned at `offset` in its uncompressed stream. Raw
    /// files seek; gzip files skip through the decoder.
    pub fn resume_path(
        path: impl AsRef<Path>,
        offset: u64,
        version: u32,
    ) -> Result<EntryReader<Box<dyn Read + Send>>> {
        let mut file = File::open(path)?;
        let mut magic = [0u8; 2];
        let is_gzip = match file.read_exact(&mut magic) {
            Ok(()) => magic == GZIP_MAGIC,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => false,
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(0))?;
        let stream: Box<dyn Read + Send> = if is_gzip {
            let mut decoder = BufReader::new(GzDecoder::new(BufReader::new(file)));
            io::copy(&mut (&mut decoder).take(offset), &mut io::sink())?;
            Box::new(decoder)
        } else {
            file.seek(SeekFrom::Start(offset))?;
            Box::new(BufReader::new(file))
        };
        Ok(EntryReader::resume(stream, offset, version))
    }
}

fn open_stream(mut file: File) -> Result<Box<dyn Read + Send>> {
    let mut magic = [0u8; 2];
    let read = {
        let mut filled = 0;
        loop {
            match file.read(&mut magic[filled..]) {
                Ok(0) => break filled,
                Ok(n) => {
                    filled += n;
                    if filled == magic.len() {
                        break filled;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    };
    let head = io::Cursor::new(magic[..read].to_vec());
    if read == 2 && magic == GZIP_MAGIC {
        Ok(Box::new(BufReader::new(GzDecoder::new(
            head.chain(BufReader::new(file)),
        ))))
    } else {
        Ok(Box::new(head.chain(BufReader::new(file))))
    }
}

fn parse_entry<R: Read>(input: &mut R, tag: u8) -> io::Result<ReadEntry> {
    let (kind, multicast) = EntryKind::from_wire(tag & KIND_MASK).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid entry kind {:#04x}", tag & KIND_MASK),
        )
    })?;

    if multicast {
        let mut id = [0u8; 16];
        input.read_exact(&mut id)?;
        let mut prev = [0u8; 1];
        input.read_exact(&mut prev)?;
        let prev_kind = match prev[0] {
            0 => None,
            k => Some(
                EntryKind::from_wire(k)
                    .filter(|(_, mc)| !mc)
                    .map(|(kind, _)| kind)
                    .ok_or_else(|| {
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("invalid previous-entry kind {k:#04x}"),
                        )
                    })?,
            ),
        };
        let prev_time = read_time(input)?;
        let depth = read_varint(input)?;
        let entry = parse_payload(input, tag, kind)?;
        Ok(ReadEntry::Multicast(MulticastEntry {
            monitor_id: MonitorId::from_bytes(id),
            depth,
            prev_kind,
            prev_time,
            entry,
        }))
    } else {
        Ok(ReadEntry::Unicast(parse_payload(input, tag, kind)?))
    }
}

fn parse_payload<R: Read>(input: &mut R, tag: u8, kind: EntryKind) -> io::Result<LogEntry> {
    let time = read_time(input)?;
    let mut level_bytes = [0u8; 2];
    input.read_exact(&mut level_bytes)?;
    let level_bits = u16::from_le_bytes(level_bytes);
    let level = LogLevel::from_bits(level_bits).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid level bits {level_bits:#06x}"),
        )
    })?;

    let mut data = EntryData {
        time,
        level,
        ..EntryData::default()
    };
    if tag & HAS_TEXT != 0 {
        data.text = Some(read_string(input)?);
    }
    if tag & HAS_TAGS != 0 {
        data.tags = Some(TagSet::parse(&read_string(input)?));
    }
    if tag & HAS_LOCATION != 0 {
        data.source_file = Some(read_string(input)?);
        data.source_line = Some(read_varint(input)? as u32);
    }
    if tag & HAS_EXCEPTION != 0 {
        data.exception = Some(read_exception(input, 0)?);
    }

    Ok(match kind {
        EntryKind::Line => LogEntry::Line(data),
        EntryKind::OpenGroup => LogEntry::OpenGroup(data),
        EntryKind::CloseGroup => {
            let count = read_count(input)?;
            let mut conclusions = Vec::with_capacity(count.min(64));
            for _ in 0..count {
                conclusions.push(read_string(input)?);
            }
            LogEntry::CloseGroup { data, conclusions }
        }
    })
}

fn read_time<R: Read>(input: &mut R) -> io::Result<LogTime> {
    let mut nanos = [0u8; 8];
    input.read_exact(&mut nanos)?;
    let mut uniq = [0u8; 1];
    input.read_exact(&mut uniq)?;
    Ok(LogTime::from_parts(u64::from_le_bytes(nanos), uniq[0]))
}

const MAX_EXCEPTION_DEPTH: u32 = 64;

fn read_exception<R: Read>(input: &mut R, depth: u32) -> io::Result<ExceptionData> {
    if depth > MAX_EXCEPTION_DEPTH {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "exception nesting exceeds the stream limit",
        ));
    }
    let message = read_string(input)?;
    let type_name = read_string(input)?;
    let mut flags = [0u8; 1];
    input.read_exact(&mut flags)?;
    let flags = flags[0];

    let mut data = ExceptionData::new(type_name, message);
    if flags & EXC_STACK != 0 {
        data.stack_trace = Some(read_string(input)?);
    }
    if flags & EXC_INNER != 0 {
        data.inner = Some(Box::new(read_exception(input, depth + 1)?));
    }
    if flags & EXC_AGGREGATED != 0 {
        let count = read_count(input)?;
        let mut items = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            items.push(read_exception(input, depth + 1)?);
        }
        data.aggregated = Some(items);
    }
    if flags & EXC_LOADER != 0 {
        let count = read_count(input)?;
        let mut items = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            items.push(read_exception(input, depth + 1)?);
        }
        data.loader_exceptions = Some(items);
    }
    if flags & EXC_FUSION != 0 {
        data.fusion_log = Some(read_string(input)?);
    }
    Ok(data)
}
