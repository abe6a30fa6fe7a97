//! Built-in sink implementations.
//!
//! Each sink implements [`Sink`](crate::Sink) and is described by one
//! [`SinkConfig`](crate::SinkConfig) variant:
//!
//! - [`TextFileSink`] - human-readable files
//! - [`BinaryFileSink`] - the framed binary format, optionally gzipped
//! - [`ConsoleSink`] - formatted lines on stdout/stderr
//! - [`PipeSink`] - the inter-process pipe protocol

mod binary_file;
mod console;
mod pipe;
mod text_file;

#[cfg(test)]
pub mod probe;

pub use binary_file::BinaryFileSink;
pub use console::ConsoleSink;
pub use pipe::PipeSink;
pub use text_file::TextFileSink;

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{EntryKind, ExceptionData, MulticastEntry};

/// Process-unique suffix so files opened within one clock tick never
/// collide.
pub(crate) fn next_file_seq() -> u64 {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    SEQ.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn file_stamp() -> String {
    format!(
        "{}-{}",
        chrono::Utc::now().format("%Y%m%d-%H%M%S"),
        next_file_seq()
    )
}

/// Render one entry the way the text and console sinks show it.
pub(crate) fn render_entry(out: &mut String, mc: &MulticastEntry) {
    let data = mc.entry.data();
    let marker = match mc.entry.kind() {
        EntryKind::Line => '|',
        EntryKind::OpenGroup => '>',
        EntryKind::CloseGroup => '<',
    };
    // A group's own lines sit at the parent's indentation.
    let indent = match mc.entry.kind() {
        EntryKind::Line => mc.depth,
        EntryKind::OpenGroup | EntryKind::CloseGroup => mc.depth.saturating_sub(1),
    };

    let _ = write!(
        out,
        "{} {:<5} {} ",
        data.time,
        data.level.severity().label(),
        &mc.monitor_id.to_string()[..8]
    );
    for _ in 0..indent {
        out.push_str("  ");
    }
    out.push(marker);
    if let Some(text) = &data.text {
        out.push(' ');
        out.push_str(text);
    }
    if let Some(tags) = &data.tags {
        if !tags.is_empty() {
            let _ = write!(out, " [{tags}]");
        }
    }
    if let (Some(file), Some(line)) = (&data.source_file, data.source_line) {
        let _ = write!(out, " ({file}:{line})");
    }
    let conclusions = mc.entry.conclusions();
    if !conclusions.is_empty() {
        let _ = write!(out, " => {}", conclusions.join("; "));
    }
    if let Some(exception) = &data.exception {
        render_exception(out, exception, 1);
    }
}

fn render_exception(out: &mut String, e: &ExceptionData, level: usize) {
    let pad = "    ".repeat(level);
    let _ = write!(out, "\n{pad}! {}: {}", e.type_name, e.message);
    if let Some(stack) = &e.stack_trace {
        for frame in stack.lines() {
            let _ = write!(out, "\n{pad}  {frame}");
        }
    }
    if let Some(inner) = &e.inner {
        render_exception(out, inner, level + 1);
    }
    if let Some(aggregated) = &e.aggregated {
        for item in aggregated {
            render_exception(out, item, level + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntryData, LogEntry, LogTime, MonitorId, Severity, TagSet};

    #[test]
    fn rendered_line_carries_everything() {
        let mc = MulticastEntry {
            monitor_id: MonitorId::new_unique(),
            depth: 2,
            prev_kind: None,
            prev_time: LogTime::ZERO,
            entry: LogEntry::Line(
                EntryData::new(Severity::Warn)
                    .with_text("row rejected")
                    .with_tags(TagSet::new(["Sql"]))
                    .with_location("import.rs", 42),
            ),
        };
        let mut line = String::new();
        render_entry(&mut line, &mc);

        assert!(line.contains("warn"));
        assert!(line.contains("    | row rejected"));
        assert!(line.contains("[Sql]"));
        assert!(line.contains("(import.rs:42)"));
    }

    #[test]
    fn rendered_close_group_shows_conclusions() {
        let mc = MulticastEntry {
            monitor_id: MonitorId::new_unique(),
            depth: 1,
            prev_kind: Some(EntryKind::Line),
            prev_time: LogTime::ZERO,
            entry: LogEntry::CloseGroup {
                data: EntryData::new(Severity::Info),
                conclusions: vec!["5 rows".into(), "0 errors".into()],
            },
        };
        let mut line = String::new();
        render_entry(&mut line, &mc);
        assert!(line.contains("< => 5 rows; 0 errors"));
    }

    #[test]
    fn file_stamps_are_unique() {
        assert_ne!(file_stamp(), file_stamp());
    }
}
