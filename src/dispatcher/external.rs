use std::sync::Mutex;

use crate::dispatcher::Shared;
use crate::{
    EntryData, LevelFilter, LogEntry, LogFilter, LogLevel, LogTime, MulticastEntry, TagSet,
};

// All contextless sources share one clock so their stamps stay strictly
// increasing process-wide.
static EXTERNAL_CLOCK: Mutex<LogTime> = Mutex::new(LogTime::ZERO);

static DEFAULT_FILTER: Mutex<LogFilter> = Mutex::new(LogFilter::TERSE);

/// The process default filter, the fallback of every `Undefined` filter.
pub fn default_filter() -> LogFilter {
    *DEFAULT_FILTER.lock().unwrap()
}

/// Replace the process default filter, returning the previous one.
pub fn set_default_filter(filter: LogFilter) -> LogFilter {
    std::mem::replace(&mut *DEFAULT_FILTER.lock().unwrap(), filter)
}

pub(crate) fn next_external_time() -> LogTime {
    let mut last = EXTERNAL_CLOCK.lock().unwrap();
    let next = LogTime::next_after(*last);
    *last = next;
    next
}

/// Emit through the contextless path of `shared`.
///
/// A level carrying the filtered marker bypasses the gate; otherwise the
/// severity must pass the dispatcher's external filter, falling back to the
/// process default filter's line part when the external filter is
/// `Undefined`.
pub(crate) fn emit_external(
    shared: &Shared,
    level: LogLevel,
    text: Option<String>,
    tags: Option<TagSet>,
) {
    if !level.is_filtered() {
        let mut threshold = shared.external_filter();
        if threshold == LevelFilter::Undefined {
            threshold = default_filter().line;
        }
        if !threshold.allows(level.severity()) {
            return;
        }
    }
    let mut data = EntryData::new(level);
    data.time = next_external_time();
    data.text = text;
    data.tags = tags;
    shared.submit(MulticastEntry::external(LogEntry::Line(data)));
}

/// Log through the ambient default dispatcher's contextless path.
///
/// A no-op when no default dispatcher is active.
pub fn external_log(level: impl Into<LogLevel>, text: impl Into<String>) {
    if let Some(dispatcher) = crate::dispatcher::default_dispatcher() {
        dispatcher.external_log(level, text, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Severity;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[test]
    fn external_clock_is_strictly_increasing() {
        let mut last = next_external_time();
        for _ in 0..500 {
            let next = next_external_time();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn filter_gate_truth_table() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(tx));
        shared.set_filters(LogFilter::RELEASE, LevelFilter::Info);

        // Below the external threshold: suppressed.
        emit_external(&shared, LogLevel::TRACE, Some("quiet".into()), None);
        // At/above the threshold: emitted.
        emit_external(&shared, LogLevel::WARN, Some("loud".into()), None);
        // Filtered marker: emitted regardless of any threshold.
        emit_external(
            &shared,
            LogLevel::TRACE.as_filtered(),
            Some("forced".into()),
            None,
        );

        let mut seen = Vec::new();
        while let Ok(entry) = rx.try_recv() {
            assert!(entry.monitor_id.is_nil());
            seen.push(entry.entry.data().text.clone().unwrap());
        }
        assert_eq!(seen, ["loud", "forced"]);
    }

    #[test]
    fn undefined_external_filter_falls_back_to_the_process_default() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(tx));
        // External filter left undefined; process default TERSE lines = Warn.
        emit_external(&shared, LogLevel::new(Severity::Info), Some("info".into()), None);
        emit_external(&shared, LogLevel::new(Severity::Error), Some("error".into()), None);

        let mut seen = Vec::new();
        while let Ok(entry) = rx.try_recv() {
            seen.push(entry.entry.data().text.clone().unwrap());
        }
        assert_eq!(seen, ["error"]);
    }
}
