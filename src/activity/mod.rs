//! Rebuilding per-monitor activity from persisted streams.
//!
//! [`MultiLogReader`] indexes any number of binary log files (raw or gzip)
//! in a single pass each and merges them into an [`ActivityMap`]: for every
//! monitor observed, where its entries live (file, byte offsets), when they
//! happened, how deep its groups were, and which tags it used. From there,
//! [`MonitorReader`] seeks a file to an exact entry offset and walks one
//! monitor's stream, skipping everything else.

mod filtered;
mod multi;

pub use filtered::{MonitorEntries, MonitorReader};
pub use multi::{AddOutcome, AddResult, MultiLogReader};

use std::path::PathBuf;

use crate::{LogTime, MonitorId, TagSet};

/// A snapshot of everything the index knows.
///
/// Monitor counts are workload-dependent: the dispatcher's own private
/// monitor appears only when it emitted during the run (for example to
/// report a quarantined sink), so identical workloads may index one monitor
/// more or less. Consumers should match on monitor ids, not counts.
#[derive(Debug, Clone)]
pub struct ActivityMap {
    /// Per-monitor activity, sorted by each monitor's first entry time.
    pub monitors: Vec<MonitorActivity>,
    pub first_entry_time: Option<LogTime>,
    pub last_entry_time: Option<LogTime>,
    pub files: Vec<FileSummary>,
}

impl ActivityMap {
    pub fn monitor(&self, id: MonitorId) -> Option<&MonitorActivity> {
        self.monitors.iter().find(|m| m.id == id)
    }
}

/// One monitor's presence across the indexed files.
#[derive(Debug, Clone)]
pub struct MonitorActivity {
    pub id: MonitorId,
    /// Ordered by first entry time; duplicate raw/gzip pairs are collapsed
    /// into the record of whichever file was indexed first.
    pub files: Vec<FileActivity>,
}

impl MonitorActivity {
    pub fn first_time(&self) -> Option<LogTime> {
        self.files.first().map(|f| f.first_time)
    }

    pub fn last_time(&self) -> Option<LogTime> {
        self.files.iter().map(|f| f.last_time).max()
    }

    pub fn entry_count(&self) -> u64 {
        self.files.iter().map(|f| f.entry_count).sum()
    }
}

/// One monitor's slice of one file.
///
/// Offsets are the exact positions of entry tag bytes, counted in the
/// uncompressed stream, so a raw file and its gzip twin report identical
/// offsets.
#[derive(Debug, Clone)]
pub struct FileActivity {
    pub path: PathBuf,
    pub first_offset: u64,
    pub last_offset: u64,
    pub first_depth: u64,
    pub last_depth: u64,
    pub first_time: LogTime,
    pub last_time: LogTime,
    /// Union of every tag set this monitor used in this file.
    pub tags: TagSet,
    pub entry_count: u64,
}

/// Per-file indexing outcome kept in the map.
#[derive(Debug, Clone)]
pub struct FileSummary {
    pub path: PathBuf,
    /// Every monitor record in this file duplicated an earlier file
    /// (typically the raw/gzip twin); paging skips it.
    pub duplicate: bool,
    /// The file ended without the sentinel; its entries are indexed anyway.
    pub bad_end_of_file: bool,
}
