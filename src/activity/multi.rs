use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::activity::{
    ActivityMap, FileActivity, FileSummary, MonitorActivity, MonitorEntries, MonitorReader,
};
use crate::codec::EntryReader;
use crate::{Error, LogTime, MonitorId, MulticastEntry, Result, TagSet};

/// Why a path handed to [`MultiLogReader::add`] was or was not indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The file was walked and its monitors merged into the map.
    Indexed,
    /// The same file (by canonical path, or by length plus first entry
    /// time) is already part of the index.
    AlreadyKnown,
    /// The file was walked, but every monitor record in it duplicated an
    /// earlier file — a raw/gzip twin. It stays listed, flagged, and paging
    /// ignores it.
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct AddResult {
    pub path: PathBuf,
    pub outcome: AddOutcome,
}

impl AddResult {
    pub fn newly_indexed(&self) -> bool {
        matches!(self.outcome, AddOutcome::Indexed | AddOutcome::Duplicate)
    }
}

struct IndexedFile {
    path: PathBuf,
    len: u64,
    version: u32,
    first_time: Option<LogTime>,
    duplicate: bool,
    bad_eof: bool,
}

struct MonitorFileRecord {
    file: usize,
    first_offset: u64,
    last_offset: u64,
    first_depth: u64,
    last_depth: u64,
    first_time: LogTime,
    last_time: LogTime,
    tags: TagSet,
    entry_count: u64,
}

impl MonitorFileRecord {
    fn same_stream(&self, other: &MonitorFileRecord) -> bool {
        self.first_time == other.first_time
            && self.last_time == other.last_time
            && self.first_offset == other.first_offset
            && self.last_offset == other.last_offset
    }
}

/// Builds a merged per-monitor index over any number of log files.
#[derive(Default)]
pub struct MultiLogReader {
    files: Vec<IndexedFile>,
    monitors: HashMap<MonitorId, Vec<MonitorFileRecord>>,
}

impl MultiLogReader {
    pub fn new() -> MultiLogReader {
        MultiLogReader::default()
    }

    /// Index each path once. Already-known and duplicate files are reported
    /// per path rather than failing the batch; real IO or header errors do.
    pub fn add<I, P>(&mut self, paths: I) -> Result<Vec<AddResult>>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut results = Vec::new();
        for path in paths {
            let given = path.as_ref().to_path_buf();
            let canonical = std::fs::canonicalize(&given)?;
            let outcome = if self.files.iter().any(|f| f.path == canonical) {
                AddOutcome::AlreadyKnown
            } else {
                self.index_file(&canonical)?
            };
            results.push(AddResult {
                path: given,
                outcome,
            });
        }
        Ok(results)
    }

    fn index_file(&mut self, path: &Path) -> Result<AddOutcome> {
        let len = std::fs::metadata(path)?.len();
        let mut reader = EntryReader::open_path(path)?;
        let file_index = self.files.len();

        let mut records: Vec<(MonitorId, MonitorFileRecord)> = Vec::new();
        let mut first_time: Option<LogTime> = None;
        let mut probed = false;

        while reader.move_next() {
            let offset = reader.current_offset();
            let current = reader.current().expect("move_next returned true");
            if first_time.is_none() {
                first_time = Some(current.time());
            }
            if !probed {
                probed = true;
                // Same length and same first stamp: the file content is
                // already indexed under another path.
                if self
                    .files
                    .iter()
                    .any(|f| f.len == len && f.first_time == first_time)
                {
                    return Ok(AddOutcome::AlreadyKnown);
                }
            }
            let Some(mc) = current.multicast() else {
                // Unicast entries (captured pipe streams) carry no monitor
                // attribution and cannot be indexed.
                continue;
            };
            update_records(&mut records, file_index, offset, mc);
        }

        let duplicate = !records.is_empty()
            && records.iter().all(|(id, rec)| {
                self.monitors
                    .get(id)
                    .is_some_and(|known| known.iter().any(|k| k.same_stream(rec)))
            });

        self.files.push(IndexedFile {
            path: path.to_path_buf(),
            len,
            version: reader.version(),
            first_time,
            duplicate,
            bad_eof: reader.bad_end_of_file(),
        });

        if duplicate {
            return Ok(AddOutcome::Duplicate);
        }
        for (id, rec) in records {
            let known = self.monitors.entry(id).or_default();
            if !known.iter().any(|k| k.same_stream(&rec)) {
                known.push(rec);
            }
        }
        Ok(AddOutcome::Indexed)
    }

    /// Snapshot the index.
    pub fn activity_map(&self) -> ActivityMap {
        let mut monitors: Vec<MonitorActivity> = self
            .monitors
            .iter()
            .map(|(id, records)| {
                let mut files: Vec<FileActivity> = records
                    .iter()
                    .map(|rec| FileActivity {
                        path: self.files[rec.file].path.clone(),
                        first_offset: rec.first_offset,
                        last_offset: rec.last_offset,
                        first_depth: rec.first_depth,
                        last_depth: rec.last_depth,
                        first_time: rec.first_time,
                        last_time: rec.last_time,
                        tags: rec.tags.clone(),
                        entry_count: rec.entry_count,
                    })
                    .collect();
                files.sort_by_key(|f| f.first_time);
                MonitorActivity { id: *id, files }
            })
            .collect();
        monitors.sort_by_key(|m| m.first_time());

        ActivityMap {
            first_entry_time: monitors.iter().filter_map(MonitorActivity::first_time).min(),
            last_entry_time: monitors.iter().filter_map(MonitorActivity::last_time).max(),
            monitors,
            files: self
                .files
                .iter()
                .map(|f| FileSummary {
                    path: f.path.clone(),
                    duplicate: f.duplicate,
                    bad_end_of_file: f.bad_eof,
                })
                .collect(),
        }
    }

    /// Open one monitor's stream at an exact entry offset of `path`.
    ///
    /// The entry at `offset` must be a multicast entry of that monitor;
    /// anything else is an error.
    pub fn monitor_reader(
        &self,
        id: MonitorId,
        path: impl AsRef<Path>,
        offset: u64,
    ) -> Result<MonitorReader> {
        let canonical = std::fs::canonicalize(path.as_ref())?;
        let file = self
            .files
            .iter()
            .find(|f| f.path == canonical)
            .ok_or_else(|| Error::NotIndexed(canonical.display().to_string()))?;
        MonitorReader::open(&file.path, offset, file.version, id)
    }

    /// Every entry of one monitor, chaining its non-duplicate files in
    /// first-time order.
    pub fn monitor_entries(&self, id: MonitorId) -> Result<MonitorEntries> {
        let records = self
            .monitors
            .get(&id)
            .ok_or_else(|| Error::NotIndexed(id.to_string()))?;
        let mut segments: Vec<_> = records
            .iter()
            .map(|rec| {
                let file = &self.files[rec.file];
                (rec.first_time, file.path.clone(), rec.first_offset, file.version)
            })
            .collect();
        segments.sort_by_key(|(first_time, ..)| *first_time);
        Ok(MonitorEntries::new(
            id,
            segments
                .into_iter()
                .map(|(_, path, offset, version)| (path, offset, version)),
        ))
    }
}

fn update_records(
    records: &mut Vec<(MonitorId, MonitorFileRecord)>,
    file: usize,
    offset: u64,
    mc: &MulticastEntry,
) {
    let time = mc.time();
    match records.iter_mut().find(|(id, _)| *id == mc.monitor_id) {
        Some((_, rec)) => {
            rec.last_offset = offset;
            rec.last_depth = mc.depth;
            rec.last_time = time;
            if let Some(tags) = &mc.entry.data().tags {
                rec.tags.union_with(tags);
            }
            rec.entry_count += 1;
        }
        None => {
            let mut tags = TagSet::empty();
            if let Some(entry_tags) = &mc.entry.data().tags {
                tags.union_with(entry_tags);
            }
            records.push((
                mc.monitor_id,
                MonitorFileRecord {
                    file,
                    first_offset: offset,
                    last_offset: offset,
                    first_depth: mc.depth,
                    last_depth: mc.depth,
                    first_time: time,
                    last_time: time,
                    tags,
                    entry_count: 1,
                },
            ));
        }
    }
}
