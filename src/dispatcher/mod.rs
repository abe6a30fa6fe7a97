//! The dispatcher: a single-consumer queue with a background worker that
//! owns every sink.
//!
//! Producers ([`MonitorClient`]) and the contextless external path submit
//! [`MulticastEntry`] values into an unbounded queue; one worker task takes
//! them out, fans each to the active sinks in registration order, applies
//! reconfigurations atomically, drives periodic timer callbacks, and
//! quarantines faulty sinks. Shutdown is bounded: [`Dispatcher::finalize`]
//! drains until a deadline, then force-closes.

mod client;
mod config;
pub mod critical;
mod external;
mod registry;
mod sink;
mod worker;

pub use client::{GroupScope, MonitorClient};
pub use config::{
    BinaryFileConfig, ConsoleConfig, DispatcherConfig, PipeConfig, SinkConfig, TextFileConfig,
};
pub use critical::{CriticalError, CriticalErrorSubscription};
pub use external::{default_filter, external_log, set_default_filter};
pub use sink::Sink;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{Error, LevelFilter, LogFilter, LogLevel, MulticastEntry, Result, TagSet};

use registry::ClientRegistry;
use worker::Worker;

/// State shared between the dispatcher handle, its clients and the worker.
pub(crate) struct Shared {
    sender: mpsc::UnboundedSender<MulticastEntry>,
    stopped: AtomicBool,
    force_close: AtomicBool,
    stop_token: CancellationToken,
    pending: Mutex<Vec<PendingConfig>>,
    minimal_filter: Mutex<LogFilter>,
    external_filter: Mutex<LevelFilter>,
    registry: ClientRegistry,
}

impl Shared {
    pub(crate) fn new(sender: mpsc::UnboundedSender<MulticastEntry>) -> Shared {
        Shared {
            sender,
            stopped: AtomicBool::new(false),
            force_close: AtomicBool::new(false),
            stop_token: CancellationToken::new(),
            pending: Mutex::new(Vec::new()),
            minimal_filter: Mutex::new(LogFilter::UNDEFINED),
            external_filter: Mutex::new(LevelFilter::Undefined),
            registry: ClientRegistry::new(),
        }
    }

    /// Best-effort enqueue; a no-op once the dispatcher stopped.
    pub(crate) fn submit(&self, entry: MulticastEntry) {
        if !self.is_stopped() {
            let _ = self.sender.send(entry);
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn force_close(&self) -> bool {
        self.force_close.load(Ordering::SeqCst)
    }

    pub(crate) fn pending_configs(&self) -> MutexGuard<'_, Vec<PendingConfig>> {
        self.pending.lock().unwrap()
    }

    pub(crate) fn set_filters(&self, minimal: LogFilter, external: LevelFilter) {
        *self.minimal_filter.lock().unwrap() = minimal;
        *self.external_filter.lock().unwrap() = external;
    }

    pub(crate) fn minimal_filter(&self) -> LogFilter {
        *self.minimal_filter.lock().unwrap()
    }

    pub(crate) fn external_filter(&self) -> LevelFilter {
        *self.external_filter.lock().unwrap()
    }

    pub(crate) fn registry(&self) -> &ClientRegistry {
        &self.registry
    }
}

/// One configuration awaiting the worker, with its optional waiter.
pub(crate) struct PendingConfig {
    config: DispatcherConfig,
    ack: Option<oneshot::Sender<()>>,
}

impl PendingConfig {
    pub(crate) fn take_ack(&mut self) -> Option<oneshot::Sender<()>> {
        self.ack.take()
    }

    pub(crate) fn into_config(self) -> DispatcherConfig {
        self.config
    }
}

/// A structured activity-log dispatcher.
///
/// Create one with [`Dispatcher::new`] (requires a running Tokio runtime;
/// the worker is a spawned task), hand [`MonitorClient`]s to producers via
/// [`ensure_client`](Self::ensure_client), and dispose with
/// [`finalize`](Self::finalize). Entries submitted after
/// [`stop`](Self::stop) are silently dropped — producers never block and
/// never fail.
pub struct Dispatcher {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn a dispatcher applying `config` before the first entry is
    /// dispatched.
    pub fn new(config: DispatcherConfig) -> Arc<Dispatcher> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(sender));
        shared.set_filters(config.minimal_filter, config.external_filter);

        // The worker's own monitor is a registered producer from the start,
        // so sink self-diagnostics re-enter the queue like everything else.
        let monitor = Arc::new(MonitorClient::new(shared.clone()));
        shared.registry.register(&monitor);

        let timer_period = config.timer_duration;
        let external_period = config.external_timer_duration;
        shared.pending.lock().unwrap().push(PendingConfig {
            config,
            ack: None,
        });

        let worker = Worker::new(
            receiver,
            shared.clone(),
            monitor,
            timer_period,
            external_period,
        );
        let handle = tokio::spawn(worker.run());

        Arc::new(Dispatcher {
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Non-blocking, best-effort submission. Dropped silently when the
    /// dispatcher has stopped.
    pub fn submit(&self, entry: MulticastEntry) {
        self.shared.submit(entry);
    }

    /// Queue a reconfiguration.
    ///
    /// With `wait`, resolves once the worker has consumed the
    /// configuration. Pending configurations are coalesced: when several
    /// are consumed in one batch only the last handler set is materialised,
    /// so a waited-on configuration may already have been superseded when
    /// the wait resolves.
    pub async fn apply_config(&self, config: DispatcherConfig, wait: bool) {
        if self.shared.is_stopped() {
            return;
        }
        let waiter = {
            let mut pending = self.shared.pending.lock().unwrap();
            if wait {
                let (tx, rx) = oneshot::channel();
                pending.push(PendingConfig {
                    config,
                    ack: Some(tx),
                });
                Some(rx)
            } else {
                pending.push(PendingConfig { config, ack: None });
                None
            }
        };
        if let Some(rx) = waiter {
            // An error just means the worker shut down first.
            let _ = rx.await;
        }
    }

    /// One-shot stop: closes the queue to new submissions and fires the
    /// stopped token. Returns `true` only for the caller that performed the
    /// transition.
    pub fn stop(&self) -> bool {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.shared.stop_token.cancel();
        true
    }

    /// Stop and wait for the worker to drain, bounded by `deadline`
    /// (`Duration::MAX` waits forever). Past the deadline, force-close is
    /// set: the worker abandons undrained entries and exits within one poll
    /// interval — unless a sink is wedged inside a call, in which case the
    /// worker is abandoned to finish in the background.
    ///
    /// Returns `true` when the drain completed cleanly.
    pub async fn finalize(&self, deadline: Duration) -> bool {
        self.stop();
        let handle = self.worker.lock().unwrap().take();
        let Some(mut handle) = handle else {
            return true;
        };
        if deadline == Duration::MAX {
            let _ = (&mut handle).await;
            return true;
        }
        match tokio::time::timeout(deadline, &mut handle).await {
            Ok(_) => true,
            Err(_) => {
                self.shared.force_close.store(true, Ordering::SeqCst);
                // One poll interval plus margin for the worker to notice.
                const GRACE: Duration = Duration::from_millis(150);
                if tokio::time::timeout(GRACE, &mut handle).await.is_err() {
                    tracing::warn!("dispatcher worker abandoned after force-close grace");
                }
                false
            }
        }
    }

    /// Observable that fires at [`stop`](Self::stop).
    pub fn stopped_token(&self) -> CancellationToken {
        self.shared.stop_token.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Create and register a client for a new producer.
    pub fn ensure_client(&self) -> Result<Arc<MonitorClient>> {
        if self.shared.is_stopped() {
            return Err(Error::Disposed);
        }
        let client = Arc::new(MonitorClient::new(self.shared.clone()));
        self.shared.registry.register(&client);
        Ok(client)
    }

    /// The lower-bound filter producers should combine with their own.
    pub fn minimal_filter(&self) -> LogFilter {
        self.shared.minimal_filter()
    }

    pub fn external_filter(&self) -> LevelFilter {
        self.shared.external_filter()
    }

    /// Emit through the contextless external path (see
    /// [`external_log`](crate::external_log) for the gate semantics).
    pub fn external_log(
        &self,
        level: impl Into<LogLevel>,
        text: impl Into<String>,
        tags: Option<TagSet>,
    ) {
        external::emit_external(&self.shared, level.into(), Some(text.into()), tags);
    }

    /// Number of registered clients still alive (the worker's own monitor
    /// included). Dropping a client releases its handle immediately, so the
    /// count never waits on the external timer's compaction sweep.
    pub fn client_count(&self) -> usize {
        self.shared.registry.len()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Without an explicit finalize the worker still winds down: it
        // notices the stop and drains on its own, detached.
        self.stop();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("stopped", &self.is_stopped())
            .field("clients", &self.client_count())
            .finish()
    }
}

static DEFAULT: Mutex<Option<Arc<Dispatcher>>> = Mutex::new(None);

/// Create the ambient default dispatcher, or apply `config` to the existing
/// one.
pub async fn ensure_default(config: DispatcherConfig) -> Arc<Dispatcher> {
    let existing = DEFAULT.lock().unwrap().clone();
    if let Some(dispatcher) = existing {
        if !dispatcher.is_stopped() {
            dispatcher.apply_config(config, true).await;
            return dispatcher;
        }
    }
    let dispatcher = Dispatcher::new(config);
    *DEFAULT.lock().unwrap() = Some(dispatcher.clone());
    dispatcher
}

/// The ambient default dispatcher, if one is active.
pub fn default_dispatcher() -> Option<Arc<Dispatcher>> {
    DEFAULT.lock().unwrap().clone()
}

/// Finalize and clear the ambient default. The slot stays empty until
/// [`ensure_default`] is called again — there is no implicit resurrection.
pub async fn dispose_default(deadline: Duration) {
    let taken = DEFAULT.lock().unwrap().take();
    if let Some(dispatcher) = taken {
        dispatcher.finalize(deadline).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{AddResult, MultiLogReader};
    use crate::codec::EntryReader;
    use crate::sinks::probe;
    use crate::{EntryData, EntryKind, Severity};
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicUsize;

    struct CollectingSink {
        seen: Arc<Mutex<Vec<String>>>,
        deactivations: Arc<AtomicUsize>,
    }

    impl Sink for CollectingSink {
        fn name(&self) -> &str {
            "collecting-test-sink"
        }

        fn activate(&mut self, _monitor: &MonitorClient) -> Result<bool> {
            Ok(true)
        }

        fn apply_config(&mut self, _config: &SinkConfig) -> Result<bool> {
            Ok(false)
        }

        fn handle(&mut self, _monitor: &MonitorClient, entry: &MulticastEntry) -> Result<()> {
            if let Some(text) = &entry.entry.data().text {
                self.seen.lock().unwrap().push(text.clone());
            }
            Ok(())
        }

        fn deactivate(&mut self, _monitor: &MonitorClient) -> Result<()> {
            self.deactivations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn collecting_probe() -> (SinkConfig, Arc<Mutex<Vec<String>>>, Arc<AtomicUsize>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let deactivations = Arc::new(AtomicUsize::new(0));
        let (seen2, deact2) = (seen.clone(), deactivations.clone());
        let config = probe::register(move || {
            Box::new(CollectingSink {
                seen: seen2.clone(),
                deactivations: deact2.clone(),
            })
        });
        (SinkConfig::Probe(config), seen, deactivations)
    }

    struct FailingSink {
        handled: usize,
        fail_at: usize,
        successes: Arc<AtomicUsize>,
        deactivations: Arc<AtomicUsize>,
    }

    impl Sink for FailingSink {
        fn name(&self) -> &str {
            "failing-test-sink"
        }

        fn activate(&mut self, _monitor: &MonitorClient) -> Result<bool> {
            Ok(true)
        }

        fn apply_config(&mut self, _config: &SinkConfig) -> Result<bool> {
            Ok(false)
        }

        fn handle(&mut self, _monitor: &MonitorClient, _entry: &MulticastEntry) -> Result<()> {
            self.handled += 1;
            if self.handled == self.fail_at {
                return Err(Error::Config("scripted failure".into()));
            }
            self.successes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn deactivate(&mut self, _monitor: &MonitorClient) -> Result<()> {
            self.deactivations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct SleepySink {
        handled: Arc<AtomicUsize>,
        nap: Duration,
    }

    impl Sink for SleepySink {
        fn name(&self) -> &str {
            "sleepy-test-sink"
        }

        fn activate(&mut self, _monitor: &MonitorClient) -> Result<bool> {
            Ok(true)
        }

        fn apply_config(&mut self, _config: &SinkConfig) -> Result<bool> {
            Ok(false)
        }

        fn handle(&mut self, _monitor: &MonitorClient, _entry: &MulticastEntry) -> Result<()> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.nap);
            Ok(())
        }
    }

    fn files_with_extension(dir: &Path, extension: &str) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|e| e == extension))
            .collect();
        files.sort();
        files
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_is_one_shot_and_closes_the_queue() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default());
        let token = dispatcher.stopped_token();
        assert!(!token.is_cancelled());

        assert!(dispatcher.stop());
        assert!(!dispatcher.stop());
        assert!(token.is_cancelled());
        assert!(matches!(dispatcher.ensure_client(), Err(Error::Disposed)));

        assert!(dispatcher.finalize(Duration::from_secs(2)).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disposal_drains_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let text_dir = dir.path().join("text");
        let bin_dir = dir.path().join("bin");
        let dispatcher = Dispatcher::new(
            DispatcherConfig::default()
                .add_handler(SinkConfig::TextFile(TextFileConfig::new(&text_dir)))
                .add_handler(SinkConfig::BinaryFile(BinaryFileConfig::new(&bin_dir))),
        );

        let client = dispatcher.ensure_client().unwrap();
        let total = 300;
        for i in 0..total {
            client.log(Severity::Info, format!("entry {i}"));
        }
        assert!(dispatcher.finalize(Duration::MAX).await);

        // No .tmp anywhere: every file was renamed on clean deactivation.
        for sub in [&text_dir, &bin_dir] {
            assert!(files_with_extension(sub, "tmp").is_empty());
        }

        let text_files = files_with_extension(&text_dir, "log");
        assert_eq!(text_files.len(), 1);
        let content = fs::read_to_string(&text_files[0]).unwrap();
        assert_eq!(content.lines().count(), total);
        assert!(content.contains("entry 0"));
        assert!(content.contains(&format!("entry {}", total - 1)));

        let bin_files = files_with_extension(&bin_dir, "lfb");
        assert_eq!(bin_files.len(), 1);
        let mut reader = EntryReader::open_path(&bin_files[0]).unwrap();
        let mut count = 0;
        let mut last_prev = None;
        while reader.move_next() {
            let mc = reader.current().unwrap().multicast().unwrap();
            assert_eq!(mc.monitor_id, client.id());
            if let Some(prev_time) = last_prev {
                assert_eq!(mc.prev_time, prev_time);
            }
            last_prev = Some(mc.time());
            count += 1;
        }
        assert_eq!(count, total);
        assert!(!reader.bad_end_of_file());
        assert!(reader.read_error().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn force_close_is_bounded_by_the_deadline() {
        let handled = Arc::new(AtomicUsize::new(0));
        let handled2 = handled.clone();
        let sleepy = probe::register(move || {
            Box::new(SleepySink {
                handled: handled2.clone(),
                nap: Duration::from_millis(200),
            })
        });
        let dispatcher =
            Dispatcher::new(DispatcherConfig::default().add_handler(SinkConfig::Probe(sleepy)));
        let client = dispatcher.ensure_client().unwrap();
        for i in 0..50 {
            client.log(Severity::Info, format!("entry {i}"));
        }
        // Let the worker get at least one entry into the sink before the
        // clock starts.
        for _ in 0..200 {
            if handled.load(Ordering::SeqCst) >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(handled.load(Ordering::SeqCst) >= 1);

        let started = std::time::Instant::now();
        let clean = dispatcher.finalize(Duration::from_millis(100)).await;
        assert!(!clean);
        assert!(started.elapsed() < Duration::from_secs(1));
        // Far fewer than the 50 submitted made it out; the rest were
        // abandoned by force-close.
        assert!(handled.load(Ordering::SeqCst) < 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reconfiguration_reuses_compatible_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let text_dir = dir.path().join("text");
        let bin_dir = dir.path().join("bin");
        let text_config = SinkConfig::TextFile(TextFileConfig::new(&text_dir));

        let dispatcher = Dispatcher::new(
            DispatcherConfig::default().add_handler(text_config.clone()),
        );
        let client = dispatcher.ensure_client().unwrap();
        client.log(Severity::Info, "one");

        // Barrier: once this resolves, "one" has been taken with the
        // text-only handler set.
        dispatcher
            .apply_config(
                DispatcherConfig::default().add_handler(text_config.clone()),
                true,
            )
            .await;
        // Same text file plus a new binary file.
        dispatcher
            .apply_config(
                DispatcherConfig::default()
                    .add_handler(text_config.clone())
                    .add_handler(SinkConfig::BinaryFile(BinaryFileConfig::new(&bin_dir))),
                true,
            )
            .await;
        client.log(Severity::Info, "two");
        assert!(dispatcher.finalize(Duration::MAX).await);

        // One text file across all three configurations: the sink was
        // absorbed in place, never deactivated and replaced.
        let text_files = files_with_extension(&text_dir, "log");
        assert_eq!(text_files.len(), 1);
        let content = fs::read_to_string(&text_files[0]).unwrap();
        assert!(content.contains("one"));
        assert!(content.contains("two"));

        // The binary sink joined at the second reconfiguration and saw only
        // the later entry.
        let bin_files = files_with_extension(&bin_dir, "lfb");
        assert_eq!(bin_files.len(), 1);
        let mut reader = EntryReader::open_path(&bin_files[0]).unwrap();
        let mut texts = Vec::new();
        while reader.move_next() {
            texts.push(
                reader
                    .current()
                    .unwrap()
                    .entry()
                    .data()
                    .text
                    .clone()
                    .unwrap(),
            );
        }
        assert_eq!(texts, ["two"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn faulty_sink_is_quarantined_alone() {
        let (first_config, first_seen, _) = collecting_probe();
        let (third_config, third_seen, _) = collecting_probe();
        let successes = Arc::new(AtomicUsize::new(0));
        let deactivations = Arc::new(AtomicUsize::new(0));
        let (successes2, deactivations2) = (successes.clone(), deactivations.clone());
        let failing = probe::register(move || {
            Box::new(FailingSink {
                handled: 0,
                fail_at: 10,
                successes: successes2.clone(),
                deactivations: deactivations2.clone(),
            })
        });

        let reports = Arc::new(Mutex::new(Vec::new()));
        let reports2 = reports.clone();
        let _subscription = critical::subscribe(move |error| {
            if error.context == "failing-test-sink" {
                reports2.lock().unwrap().push(error.message.clone());
            }
        });

        let dispatcher = Dispatcher::new(
            DispatcherConfig::default()
                .add_handler(first_config)
                .add_handler(SinkConfig::Probe(failing))
                .add_handler(third_config),
        );
        let client = dispatcher.ensure_client().unwrap();
        let total = 30;
        for i in 0..total {
            client.log(Severity::Info, format!("entry {i}"));
        }
        // Let the quarantine happen while the dispatcher is still running,
        // so the worker's self-diagnostic is accepted into the queue.
        for _ in 0..200 {
            if deactivations.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(dispatcher.finalize(Duration::MAX).await);

        let workload = |seen: &Arc<Mutex<Vec<String>>>| {
            seen.lock()
                .unwrap()
                .iter()
                .filter(|t| t.starts_with("entry "))
                .count()
        };
        // Healthy sinks saw every entry; the faulty one stopped at its
        // scripted failure and was deactivated exactly once.
        assert_eq!(workload(&first_seen), total);
        assert_eq!(workload(&third_seen), total);
        assert_eq!(successes.load(Ordering::SeqCst), 9);
        assert_eq!(deactivations.load(Ordering::SeqCst), 1);
        assert_eq!(reports.lock().unwrap().len(), 1);

        // The worker logged the fault through its own monitor, and that
        // entry flowed to the surviving sinks like any other.
        assert!(first_seen
            .lock()
            .unwrap()
            .iter()
            .any(|t| t.contains("quarantined")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn external_filter_gates_the_contextless_path() {
        let (collector, seen, _) = collecting_probe();
        let dispatcher = Dispatcher::new(
            DispatcherConfig::default()
                .with_external_filter(LevelFilter::Info)
                .add_handler(collector),
        );

        dispatcher.external_log(Severity::Trace, "quiet", None);
        dispatcher.external_log(Severity::Warn, "loud", None);
        dispatcher.external_log(LogLevel::TRACE.as_filtered(), "forced", None);
        assert!(dispatcher.finalize(Duration::MAX).await);

        assert_eq!(seen.lock().unwrap().as_slice(), ["loud", "forced"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn coalesced_waiters_all_wake() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default());
        let first = DispatcherConfig::default().with_external_filter(LevelFilter::Debug);
        let last = DispatcherConfig::default().with_external_filter(LevelFilter::Error);

        // Both waits resolve even when the batch is coalesced; the last
        // configuration is the authoritative one.
        tokio::join!(
            dispatcher.apply_config(first, true),
            dispatcher.apply_config(last, true),
        );
        assert_eq!(dispatcher.external_filter(), LevelFilter::Error);
        dispatcher.finalize(Duration::MAX).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn merged_files_reconstruct_every_monitor() {
        let dir = tempfile::tempdir().unwrap();
        let raw_dir = dir.path().join("raw");
        let gz_dir = dir.path().join("gz");
        let dispatcher = Dispatcher::new(
            DispatcherConfig::default()
                .add_handler(SinkConfig::BinaryFile(BinaryFileConfig::new(&raw_dir)))
                .add_handler(SinkConfig::BinaryFile(
                    BinaryFileConfig::new(&gz_dir).with_gzip(true),
                )),
        );

        let clients: Vec<_> = (0..3)
            .map(|_| dispatcher.ensure_client().unwrap())
            .collect();
        let per_monitor = 40;
        for i in 0..per_monitor {
            for (c, client) in clients.iter().enumerate() {
                client.log(Severity::Info, format!("monitor {c} entry {i}"));
            }
        }
        assert!(dispatcher.finalize(Duration::MAX).await);

        let raw_files = files_with_extension(&raw_dir, "lfb");
        let gz_files = files_with_extension(&gz_dir, "lfb");
        assert_eq!((raw_files.len(), gz_files.len()), (1, 1));

        let mut index = MultiLogReader::new();
        let results = index
            .add(gz_files.iter().chain(raw_files.iter()))
            .unwrap();
        assert!(results.iter().all(AddResult::newly_indexed));

        let map = index.activity_map();
        // The workload monitors, plus possibly the worker's own monitor if
        // it emitted; never fewer.
        assert!(map.monitors.len() >= 3);
        for client in &clients {
            let monitor = map.monitor(client.id()).unwrap();
            // Raw and gzip carried the same stream: one merged record.
            assert_eq!(monitor.files.len(), 1);
            assert_eq!(monitor.entry_count(), per_monitor);

            let entries: Vec<_> = index
                .monitor_entries(client.id())
                .unwrap()
                .take(per_monitor as usize * 2)
                .collect();
            assert_eq!(entries.len(), per_monitor as usize);
        }

        // The same streams indexed from the raw file alone give identical
        // offsets: gzip offsets count uncompressed bytes.
        let mut raw_only = MultiLogReader::new();
        raw_only.add(raw_files.iter()).unwrap();
        let raw_map = raw_only.activity_map();
        for client in &clients {
            let merged = &map.monitor(client.id()).unwrap().files[0];
            let raw = &raw_map.monitor(client.id()).unwrap().files[0];
            assert_eq!(merged.first_offset, raw.first_offset);
            assert_eq!(merged.last_offset, raw.last_offset);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ambient_default_lifecycle() {
        // The only test that touches the process-wide ambient slot.
        assert!(default_dispatcher().is_none());

        let dispatcher = ensure_default(DispatcherConfig::default()).await;
        assert!(Arc::ptr_eq(
            &dispatcher,
            &default_dispatcher().unwrap()
        ));

        // A second ensure applies to the existing instance.
        let again = ensure_default(
            DispatcherConfig::default().with_external_filter(LevelFilter::Warn),
        )
        .await;
        assert!(Arc::ptr_eq(&dispatcher, &again));
        assert_eq!(dispatcher.external_filter(), LevelFilter::Warn);

        external_log(Severity::Error, "ambient");

        dispose_default(Duration::MAX).await;
        assert!(default_dispatcher().is_none());
        // No implicit resurrection: the free function is now a no-op.
        external_log(Severity::Error, "dropped");
        assert!(default_dispatcher().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn group_entries_survive_the_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let bin_dir = dir.path().join("bin");
        let dispatcher = Dispatcher::new(
            DispatcherConfig::default()
                .add_handler(SinkConfig::BinaryFile(BinaryFileConfig::new(&bin_dir))),
        );
        let client = dispatcher.ensure_client().unwrap();

        {
            let outer = client.open_group(Severity::Info, "request");
            client.on_unfiltered_log(
                EntryData::new(Severity::Warn)
                    .with_text("retrying")
                    .with_tags(crate::TagSet::new(["Http"])),
            );
            {
                let _inner = client.open_group(Severity::Trace, "backend call");
                client.log(Severity::Info, "200 OK");
            }
            outer.conclude(["served in 12ms"]);
        }
        assert!(dispatcher.finalize(Duration::MAX).await);

        let files = files_with_extension(&bin_dir, "lfb");
        let mut reader = EntryReader::open_path(&files[0]).unwrap();
        let mut depths = Vec::new();
        let mut kinds = Vec::new();
        while reader.move_next() {
            let mc = reader.current().unwrap().multicast().unwrap();
            depths.push(mc.depth);
            kinds.push(mc.entry.kind());
        }
        assert_eq!(depths, [1, 1, 2, 2, 2, 1]);
        assert_eq!(
            kinds,
            [
                EntryKind::OpenGroup,
                EntryKind::Line,
                EntryKind::OpenGroup,
                EntryKind::Line,
                EntryKind::CloseGroup,
                EntryKind::CloseGroup,
            ]
        );
    }
}
