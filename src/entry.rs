use std::fmt;

use uuid::Uuid;

use crate::{ExceptionData, LogLevel, LogTime, TagSet};

/// Identifies one producer (monitor) across files and processes.
///
/// Backed by a UUID v4. [`MonitorId::nil`] is reserved for the contextless
/// external-log source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct MonitorId(Uuid);

impl MonitorId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn new_unique() -> MonitorId {
        MonitorId(Uuid::new_v4())
    }

    /// The all-zero id of the external-log source.
    pub const fn nil() -> MonitorId {
        MonitorId(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    pub(crate) fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub(crate) fn from_bytes(bytes: [u8; 16]) -> MonitorId {
        MonitorId(Uuid::from_bytes(bytes))
    }
}

impl fmt::Display for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The three entry shapes a stream can carry.
///
/// The wire tag byte stores the kind in its low nibble; multicast forms are
/// offset by [`EntryKind::MULTICAST_OFFSET`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum EntryKind {
    Line = 1,
    OpenGroup = 2,
    CloseGroup = 3,
}

impl EntryKind {
    pub(crate) const MULTICAST_OFFSET: u8 = 3;

    pub(crate) fn from_wire(kind: u8) -> Option<(EntryKind, bool)> {
        Some(match kind {
            1 => (EntryKind::Line, false),
            2 => (EntryKind::OpenGroup, false),
            3 => (EntryKind::CloseGroup, false),
            4 => (EntryKind::Line, true),
            5 => (EntryKind::OpenGroup, true),
            6 => (EntryKind::CloseGroup, true),
            _ => return None,
        })
    }
}

/// The fields every entry shape shares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct EntryData {
    pub time: LogTime,
    pub level: LogLevel,
    pub text: Option<String>,
    pub tags: Option<TagSet>,
    pub source_file: Option<String>,
    pub source_line: Option<u32>,
    pub exception: Option<ExceptionData>,
}

impl EntryData {
    pub fn new(level: impl Into<LogLevel>) -> EntryData {
        EntryData {
            level: level.into(),
            ..EntryData::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> EntryData {
        self.text = Some(text.into());
        self
    }

    pub fn with_tags(mut self, tags: TagSet) -> EntryData {
        self.tags = Some(tags);
        self
    }

    /// Attach the emission site, typically `file!()` / `line!()`.
    pub fn with_location(mut self, file: impl Into<String>, line: u32) -> EntryData {
        self.source_file = Some(file.into());
        self.source_line = Some(line);
        self
    }

    pub fn with_exception(mut self, exception: ExceptionData) -> EntryData {
        self.exception = Some(exception);
        self
    }
}

/// One structured log event.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum LogEntry {
    /// A standalone log line.
    Line(EntryData),
    /// Opens a nested scope.
    OpenGroup(EntryData),
    /// Closes the innermost scope, carrying its conclusions.
    CloseGroup {
        data: EntryData,
        conclusions: Vec<String>,
    },
}

impl LogEntry {
    pub fn kind(&self) -> EntryKind {
        match self {
            LogEntry::Line(_) => EntryKind::Line,
            LogEntry::OpenGroup(_) => EntryKind::OpenGroup,
            LogEntry::CloseGroup { .. } => EntryKind::CloseGroup,
        }
    }

    pub fn data(&self) -> &EntryData {
        match self {
            LogEntry::Line(data) | LogEntry::OpenGroup(data) => data,
            LogEntry::CloseGroup { data, .. } => data,
        }
    }

    pub fn time(&self) -> LogTime {
        self.data().time
    }

    pub fn level(&self) -> LogLevel {
        self.data().level
    }

    pub fn conclusions(&self) -> &[String] {
        match self {
            LogEntry::CloseGroup { conclusions, .. } => conclusions,
            _ => &[],
        }
    }
}

/// An entry enriched for a merged multi-monitor stream.
///
/// `prev_kind`/`prev_time` point at the same monitor's previous entry,
/// embedding a per-monitor singly-linked list in the interleaved file;
/// `depth` is the monitor's open-group count at the entry. Together they
/// make a single pass over one file enough to index every monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MulticastEntry {
    pub monitor_id: MonitorId,
    pub depth: u64,
    pub prev_kind: Option<EntryKind>,
    pub prev_time: LogTime,
    pub entry: LogEntry,
}

impl MulticastEntry {
    /// Wrap an entry from the contextless external path: nil monitor,
    /// depth 0, no predecessor.
    pub fn external(entry: LogEntry) -> MulticastEntry {
        MulticastEntry {
            monitor_id: MonitorId::nil(),
            depth: 0,
            prev_kind: None,
            prev_time: LogTime::ZERO,
            entry,
        }
    }

    pub fn time(&self) -> LogTime {
        self.entry.time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Severity;

    #[test]
    fn wire_kinds_round_trip() {
        assert_eq!(EntryKind::from_wire(1), Some((EntryKind::Line, false)));
        assert_eq!(EntryKind::from_wire(5), Some((EntryKind::OpenGroup, true)));
        assert_eq!(EntryKind::from_wire(0), None);
        assert_eq!(EntryKind::from_wire(7), None);
    }

    #[test]
    fn close_group_exposes_conclusions() {
        let entry = LogEntry::CloseGroup {
            data: EntryData::new(Severity::Info),
            conclusions: vec!["done".into(), "3 rows".into()],
        };
        assert_eq!(entry.kind(), EntryKind::CloseGroup);
        assert_eq!(entry.conclusions().len(), 2);
        assert!(LogEntry::Line(EntryData::new(Severity::Info))
            .conclusions()
            .is_empty());
    }

    #[test]
    fn external_wrapper_uses_the_nil_monitor() {
        let mc = MulticastEntry::external(LogEntry::Line(
            EntryData::new(Severity::Warn).with_text("ambient"),
        ));
        assert!(mc.monitor_id.is_nil());
        assert_eq!(mc.depth, 0);
        assert_eq!(mc.prev_kind, None);
        assert!(mc.prev_time.is_zero());
    }
}
