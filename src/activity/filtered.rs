use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use crate::codec::EntryReader;
use crate::{Error, MonitorId, MulticastEntry, Result};

/// Walks one monitor's entries inside an interleaved file.
///
/// Opened at an exact entry offset; the entry found there must belong to
/// the expected monitor. Subsequent [`move_next`](Self::move_next) calls
/// skip other monitors' entries.
pub struct MonitorReader {
    inner: EntryReader,
    monitor: MonitorId,
    primed: bool,
}

impl std::fmt::Debug for MonitorReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorReader")
            .field("monitor", &self.monitor)
            .field("primed", &self.primed)
            .finish_non_exhaustive()
    }
}

impl MonitorReader {
    pub(crate) fn open(
        path: &Path,
        offset: u64,
        version: u32,
        monitor: MonitorId,
    ) -> Result<MonitorReader> {
        let mut inner = EntryReader::resume_path(path, offset, version)?;
        if !inner.move_next() {
            return Err(inner
                .read_error()
                .cloned()
                .unwrap_or_else(|| Error::codec(offset, "no entry at seek target")));
        }
        let current = inner.current().expect("move_next returned true");
        match current.multicast() {
            Some(mc) if mc.monitor_id == monitor => Ok(MonitorReader {
                inner,
                monitor,
                primed: true,
            }),
            Some(mc) => Err(Error::WrongMonitor {
                offset,
                expected: monitor,
                found: mc.monitor_id,
            }),
            None => Err(Error::codec(offset, "seek target is not a multicast entry")),
        }
    }

    pub fn move_next(&mut self) -> bool {
        if self.primed {
            self.primed = false;
            return true;
        }
        while self.inner.move_next() {
            let is_ours = self
                .inner
                .current()
                .and_then(|e| e.multicast())
                .is_some_and(|mc| mc.monitor_id == self.monitor);
            if is_ours {
                return true;
            }
        }
        false
    }

    pub fn current(&self) -> Option<&MulticastEntry> {
        self.inner
            .current()
            .and_then(|e| e.multicast())
            .filter(|mc| mc.monitor_id == self.monitor)
    }

    pub fn current_offset(&self) -> u64 {
        self.inner.current_offset()
    }

    pub fn bad_end_of_file(&self) -> bool {
        self.inner.bad_end_of_file()
    }

    pub fn read_error(&self) -> Option<&Error> {
        self.inner.read_error()
    }
}

/// One monitor's entries chained across its files in first-time order.
///
/// Files that fail to reopen are skipped with a warning; the iterator ends
/// at the first corrupt tail (the per-file readers already preserved what
/// could be read when the index was built).
pub struct MonitorEntries {
    monitor: MonitorId,
    segments: VecDeque<(PathBuf, u64, u32)>,
    current: Option<MonitorReader>,
}

impl MonitorEntries {
    pub(crate) fn new(
        monitor: MonitorId,
        segments: impl IntoIterator<Item = (PathBuf, u64, u32)>,
    ) -> MonitorEntries {
        MonitorEntries {
            monitor,
            segments: segments.into_iter().collect(),
            current: None,
        }
    }
}

impl Iterator for MonitorEntries {
    type Item = MulticastEntry;

    fn next(&mut self) -> Option<MulticastEntry> {
        loop {
            if let Some(reader) = &mut self.current {
                if reader.move_next() {
                    return reader.current().cloned();
                }
                self.current = None;
            }
            let (path, offset, version) = self.segments.pop_front()?;
            match MonitorReader::open(&path, offset, version, self.monitor) {
                Ok(reader) => self.current = Some(reader),
                Err(e) => {
                    tracing::warn!(
                        monitor = %self.monitor,
                        path = %path.display(),
                        error = %e,
                        "skipping unreadable log file segment"
                    );
                }
            }
        }
    }
}
