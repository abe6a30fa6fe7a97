use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::dispatcher::Shared;
use crate::{
    EntryData, EntryKind, LogEntry, LogLevel, LogTime, MonitorId, MulticastEntry, TagSet,
};

/// The producer-side client of one monitor.
///
/// Implements the callback surface a host's activity monitor drives
/// (`on_open_group`, `on_group_closed`, `on_unfiltered_log`, …) and a small
/// direct API for producers without a host ([`log`](Self::log),
/// [`open_group`](Self::open_group)).
///
/// Every emission stamps a monotone [`LogTime`] from the client's own
/// clock, wraps the entry with this monitor's id, current group depth and
/// the memory of its previous entry, then submits it. The previous-entry
/// back-pointers embed a per-monitor linked list in the dispatcher's
/// interleaved output, which is what makes single-pass file indexing
/// possible.
///
/// The client holds only the submission channel of its dispatcher, never
/// the dispatcher itself; once the dispatcher stops, emissions are silently
/// dropped. Registration with the dispatcher is handle-based: dropping the
/// client releases its registry handle on the spot (the registry sweep only
/// reclaims the storage later).
pub struct MonitorClient {
    id: MonitorId,
    shared: Arc<Shared>,
    state: Mutex<ClientState>,
    released: Arc<AtomicBool>,
}

struct ClientState {
    depth: u64,
    last_time: LogTime,
    prev_kind: Option<EntryKind>,
    prev_time: LogTime,
    topic: Option<String>,
    auto_tags: TagSet,
}

impl MonitorClient {
    pub(crate) fn new(shared: Arc<Shared>) -> MonitorClient {
        MonitorClient {
            id: MonitorId::new_unique(),
            shared,
            state: Mutex::new(ClientState {
                depth: 0,
                last_time: LogTime::ZERO,
                prev_kind: None,
                prev_time: LogTime::ZERO,
                topic: None,
                auto_tags: TagSet::empty(),
            }),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The registry's release handle, flipped by this client's `Drop`.
    pub(crate) fn release_handle(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }

    pub fn id(&self) -> MonitorId {
        self.id
    }

    /// Number of currently open groups.
    pub fn depth(&self) -> u64 {
        self.state.lock().unwrap().depth
    }

    pub fn topic(&self) -> Option<String> {
        self.state.lock().unwrap().topic.clone()
    }

    /// A standalone line, already filtered upstream.
    pub fn on_unfiltered_log(&self, data: EntryData) {
        self.emit(data, EntryKind::Line, Vec::new());
    }

    /// A new group opens; the depth increases.
    pub fn on_open_group(&self, data: EntryData) {
        self.emit(data, EntryKind::OpenGroup, Vec::new());
    }

    /// Reserved hook: conclusions are still being collected at this point.
    pub fn on_group_closing(&self) {}

    /// The innermost group closed with its conclusions.
    pub fn on_group_closed(&self, level: impl Into<LogLevel>, conclusions: Vec<String>) {
        self.emit(EntryData::new(level), EntryKind::CloseGroup, conclusions);
    }

    pub fn on_topic_changed(&self, topic: impl Into<String>) {
        self.state.lock().unwrap().topic = Some(topic.into());
    }

    /// Tags merged into every subsequent emission.
    pub fn on_auto_tags_changed(&self, tags: TagSet) {
        self.state.lock().unwrap().auto_tags = tags;
    }

    /// Emit a simple line.
    pub fn log(&self, level: impl Into<LogLevel>, text: impl Into<String>) {
        self.on_unfiltered_log(EntryData::new(level).with_text(text));
    }

    /// Open a group and get a scope that closes it when dropped.
    ///
    /// The scope keeps group depth balanced by construction; use
    /// [`GroupScope::conclude`] to close with conclusions.
    pub fn open_group(
        &self,
        level: impl Into<LogLevel>,
        text: impl Into<String>,
    ) -> GroupScope<'_> {
        let level = level.into();
        self.on_open_group(EntryData::new(level).with_text(text));
        GroupScope {
            client: self,
            level,
            closed: false,
        }
    }

    fn emit(&self, mut data: EntryData, kind: EntryKind, conclusions: Vec<String>) {
        let mc = {
            let mut state = self.state.lock().unwrap();
            if kind == EntryKind::CloseGroup && state.depth == 0 {
                tracing::warn!(monitor = %self.id, "unbalanced group close dropped");
                return;
            }
            let time = LogTime::next_after(state.last_time);
            state.last_time = time;
            data.time = time;
            if !state.auto_tags.is_empty() {
                let tags = data.tags.take().unwrap_or_default();
                data.tags = Some(tags.union(&state.auto_tags));
            }
            // Open groups count themselves; close groups record the depth
            // they close.
            let depth = match kind {
                EntryKind::OpenGroup => {
                    state.depth += 1;
                    state.depth
                }
                EntryKind::Line => state.depth,
                EntryKind::CloseGroup => {
                    let depth = state.depth;
                    state.depth -= 1;
                    depth
                }
            };
            let entry = match kind {
                EntryKind::Line => LogEntry::Line(data),
                EntryKind::OpenGroup => LogEntry::OpenGroup(data),
                EntryKind::CloseGroup => LogEntry::CloseGroup { data, conclusions },
            };
            let mc = MulticastEntry {
                monitor_id: self.id,
                depth,
                prev_kind: state.prev_kind,
                prev_time: state.prev_time,
                entry,
            };
            state.prev_kind = Some(kind);
            state.prev_time = time;
            mc
        };
        self.shared.submit(mc);
    }
}

impl Drop for MonitorClient {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for MonitorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorClient")
            .field("id", &self.id)
            .field("depth", &self.depth())
            .finish()
    }
}

/// RAII handle of an open group.
///
/// Dropping the scope emits the matching close entry with no conclusions;
/// [`conclude`](Self::conclude) closes it with conclusions instead.
#[must_use = "dropping the scope closes the group immediately"]
pub struct GroupScope<'a> {
    client: &'a MonitorClient,
    level: LogLevel,
    closed: bool,
}

impl GroupScope<'_> {
    /// Close the group now, recording its conclusions.
    pub fn conclude<I, S>(mut self, conclusions: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.closed = true;
        self.client.on_group_closed(
            self.level,
            conclusions.into_iter().map(Into::into).collect(),
        );
    }
}

impl Drop for GroupScope<'_> {
    fn drop(&mut self) {
        if !self.closed {
            self.client.on_group_closed(self.level, Vec::new());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Severity;
    use tokio::sync::mpsc;

    fn client_with_queue() -> (MonitorClient, mpsc::UnboundedReceiver<MulticastEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(tx));
        (MonitorClient::new(shared), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<MulticastEntry>) -> Vec<MulticastEntry> {
        let mut out = Vec::new();
        while let Ok(entry) = rx.try_recv() {
            out.push(entry);
        }
        out
    }

    #[test]
    fn emissions_chain_previous_entries() {
        let (client, mut rx) = client_with_queue();
        client.log(Severity::Info, "one");
        client.log(Severity::Info, "two");
        client.log(Severity::Warn, "three");

        let entries = drain(&mut rx);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].prev_kind, None);
        assert!(entries[0].prev_time.is_zero());
        for pair in entries.windows(2) {
            assert_eq!(pair[1].prev_time, pair[0].time());
            assert_eq!(pair[1].prev_kind, Some(pair[0].entry.kind()));
            assert!(pair[1].time() > pair[0].time());
        }
    }

    #[test]
    fn group_scope_balances_depth() {
        let (client, mut rx) = client_with_queue();
        {
            let outer = client.open_group(Severity::Info, "outer");
            assert_eq!(client.depth(), 1);
            {
                let _inner = client.open_group(Severity::Trace, "inner");
                assert_eq!(client.depth(), 2);
                client.log(Severity::Info, "within");
            }
            assert_eq!(client.depth(), 1);
            outer.conclude(["all good"]);
        }
        assert_eq!(client.depth(), 0);

        let entries = drain(&mut rx);
        let depths: Vec<u64> = entries.iter().map(|e| e.depth).collect();
        assert_eq!(depths, [1, 2, 2, 2, 1]);
        assert_eq!(
            entries.last().unwrap().entry.conclusions(),
            ["all good".to_string()]
        );
    }

    #[test]
    fn unbalanced_close_is_dropped() {
        let (client, mut rx) = client_with_queue();
        client.on_group_closed(Severity::Info, vec!["phantom".into()]);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(client.depth(), 0);
    }

    #[test]
    fn auto_tags_are_merged_into_emissions() {
        let (client, mut rx) = client_with_queue();
        client.on_auto_tags_changed(TagSet::new(["Machine"]));
        client.on_unfiltered_log(
            EntryData::new(Severity::Info)
                .with_text("tagged")
                .with_tags(TagSet::new(["Sql"])),
        );

        let entries = drain(&mut rx);
        let tags = entries[0].entry.data().tags.as_ref().unwrap();
        assert_eq!(tags.to_canonical(), "Machine|Sql");
    }
}
