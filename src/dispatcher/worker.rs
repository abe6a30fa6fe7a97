use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{timeout, Instant};

use crate::dispatcher::{critical, CriticalErrorSubscription, PendingConfig, Shared};
use crate::{LogLevel, MonitorClient, MulticastEntry, Result, Sink, SinkConfig};

/// How long a queue take may block before the loop interleaves timer work.
const POLL: Duration = Duration::from_millis(100);

struct ActiveSink {
    sink: Box<dyn Sink>,
    faulty: bool,
}

/// The single consumer of a dispatcher's queue.
///
/// Owns every sink exclusively. One iteration: bounded take, pending
/// reconfigurations, dispatch, timers, quarantine sweep. Exits when the
/// dispatcher stopped and the queue drained, or immediately on force-close.
pub(crate) struct Worker {
    receiver: UnboundedReceiver<MulticastEntry>,
    shared: Arc<Shared>,
    monitor: Arc<MonitorClient>,
    sinks: Vec<ActiveSink>,
    timer_period: Duration,
    next_tick: Instant,
    external_period: Duration,
    next_external_tick: Instant,
    critical_subscription: Option<CriticalErrorSubscription>,
}

impl Worker {
    pub(crate) fn new(
        receiver: UnboundedReceiver<MulticastEntry>,
        shared: Arc<Shared>,
        monitor: Arc<MonitorClient>,
        timer_period: Duration,
        external_period: Duration,
    ) -> Worker {
        let now = Instant::now();
        Worker {
            receiver,
            shared,
            monitor,
            sinks: Vec::new(),
            timer_period,
            next_tick: now + timer_period,
            external_period,
            next_external_tick: now + external_period,
            critical_subscription: None,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            if self.shared.force_close() {
                break;
            }
            let entry = match timeout(POLL, self.receiver.recv()).await {
                Ok(Some(entry)) => Some(entry),
                // The shared state owns a sender, so the channel only dies
                // with it; treat it as a stop either way.
                Ok(None) => None,
                Err(_) => None,
            };
            self.apply_pending();
            if let Some(entry) = entry {
                self.dispatch(&entry);
            }
            self.run_timers();
            self.drop_faulty();
            if self.shared.force_close() {
                break;
            }
            if self.shared.is_stopped() {
                self.drain();
                break;
            }
        }
        self.shutdown();
    }

    /// Consume and apply pending configurations.
    ///
    /// The whole pending list is taken at once and coalesced: only the last
    /// configuration is materialised; every waiter is acknowledged, whether
    /// its configuration ended up authoritative or superseded.
    fn apply_pending(&mut self) {
        let mut batch = {
            let mut pending = self.shared.pending_configs();
            if pending.is_empty() {
                return;
            }
            std::mem::take(&mut *pending)
        };
        let acks: Vec<_> = batch.iter_mut().filter_map(PendingConfig::take_ack).collect();
        let config = batch.pop().expect("batch checked non-empty").into_config();

        self.shared
            .set_filters(config.minimal_filter, config.external_filter);
        if config.timer_duration != self.timer_period {
            self.timer_period = config.timer_duration;
            self.next_tick = Instant::now() + self.timer_period;
        }
        if config.external_timer_duration != self.external_period {
            self.external_period = config.external_timer_duration;
            self.next_external_tick = Instant::now() + self.external_period;
        }
        match (config.handle_critical_errors, &self.critical_subscription) {
            (true, None) => {
                let shared = self.shared.clone();
                self.critical_subscription = Some(critical::subscribe(move |error| {
                    super::external::emit_external(
                        &shared,
                        LogLevel::ERROR.as_filtered(),
                        Some(format!("{}: {}", error.context, error.message)),
                        Some(crate::TagSet::new(["CriticalError"])),
                    );
                }));
            }
            (false, Some(_)) => self.critical_subscription = None,
            _ => {}
        }

        self.reconcile(&config.handlers);
        for ack in acks {
            let _ = ack.send(());
        }
    }

    /// Match desired descriptors against live sinks.
    ///
    /// Each descriptor probes the existing sinks in order; the first that
    /// absorbs it is kept (no deactivate/activate churn), the rest of the
    /// descriptors get fresh sinks from the factory, and existing sinks
    /// nobody claimed are deactivated.
    fn reconcile(&mut self, desired: &[SinkConfig]) {
        let mut old: Vec<Option<ActiveSink>> = self.sinks.drain(..).map(Some).collect();
        let mut next: Vec<ActiveSink> = Vec::with_capacity(desired.len());
        let mut faults: Vec<(String, &'static str, String)> = Vec::new();

        for config in desired {
            let mut consumed = false;
            for slot in old.iter_mut() {
                let Some(existing) = slot.as_mut() else { continue };
                if existing.faulty {
                    continue;
                }
                match guard(|| existing.sink.apply_config(config)) {
                    Ok(true) => {
                        next.push(slot.take().expect("slot checked above"));
                        consumed = true;
                        break;
                    }
                    Ok(false) => {}
                    Err(reason) => {
                        let name = existing.sink.name().to_string();
                        existing.faulty = true;
                        faults.push((name, "apply_config", reason));
                    }
                }
            }
            if consumed {
                continue;
            }
            match config.build() {
                Ok(mut sink) => {
                    let name = sink.name().to_string();
                    match guard(|| sink.activate(&self.monitor)) {
                        Ok(true) => next.push(ActiveSink {
                            sink,
                            faulty: false,
                        }),
                        Ok(false) => {
                            tracing::debug!(sink = %name, "sink declined activation");
                        }
                        Err(reason) => faults.push((name, "activate", reason)),
                    }
                }
                Err(e) => {
                    // The descriptor is skipped; the rest of the batch
                    // still applies.
                    let reason = e.to_string();
                    faults.push((config.kind_name().to_string(), "build", reason));
                }
            }
        }

        for slot in old {
            if let Some(mut unclaimed) = slot {
                deactivate(&self.monitor, &mut unclaimed);
            }
        }
        self.sinks = next;
        for (sink, op, reason) in faults {
            self.report_fault(&sink, op, &reason);
        }
    }

    fn dispatch(&mut self, entry: &MulticastEntry) {
        let monitor = &self.monitor;
        let mut faults = Vec::new();
        for slot in &mut self.sinks {
            if slot.faulty {
                continue;
            }
            if let Err(reason) = guard(|| slot.sink.handle(monitor, entry)) {
                slot.faulty = true;
                faults.push((slot.sink.name().to_string(), reason));
            }
        }
        for (sink, reason) in faults {
            self.report_fault(&sink, "handle", &reason);
        }
    }

    fn run_timers(&mut self) {
        let now = Instant::now();
        if now < self.next_tick {
            return;
        }
        let monitor = &self.monitor;
        let period = self.timer_period;
        let mut faults = Vec::new();
        for slot in &mut self.sinks {
            if slot.faulty {
                continue;
            }
            if let Err(reason) = guard(|| slot.sink.on_timer(monitor, period)) {
                slot.faulty = true;
                faults.push((slot.sink.name().to_string(), reason));
            }
        }
        for (sink, reason) in faults {
            self.report_fault(&sink, "on_timer", &reason);
        }
        // Single fire per tick; a late loop does not catch up.
        self.next_tick = now + self.timer_period;

        if now >= self.next_external_tick {
            let swept = self.shared.registry().sweep();
            if swept > 0 {
                tracing::debug!(swept, "compacted released monitor clients");
            }
            self.next_external_tick = now + self.external_period;
        }
    }

    /// Deactivate and drop every quarantined sink.
    fn drop_faulty(&mut self) {
        if !self.sinks.iter().any(|slot| slot.faulty) {
            return;
        }
        let mut keep = Vec::with_capacity(self.sinks.len());
        for mut slot in std::mem::take(&mut self.sinks) {
            if slot.faulty {
                deactivate(&self.monitor, &mut slot);
            } else {
                keep.push(slot);
            }
        }
        self.sinks = keep;
    }

    /// Stopped: hand every queued entry to the sinks, unless force-close
    /// cuts the drain short.
    fn drain(&mut self) {
        while !self.shared.force_close() {
            match self.receiver.try_recv() {
                Ok(entry) => {
                    self.dispatch(&entry);
                    self.drop_faulty();
                }
                Err(_) => break,
            }
        }
    }

    fn shutdown(&mut self) {
        for mut slot in std::mem::take(&mut self.sinks) {
            deactivate(&self.monitor, &mut slot);
        }
        // Wake config waiters that arrived after the stop: dropping their
        // acknowledgement senders resolves the waits.
        self.shared.pending_configs().clear();
        self.critical_subscription = None;
    }

    fn report_fault(&self, sink: &str, op: &str, reason: &str) {
        tracing::error!(sink, op, reason, "sink quarantined");
        critical::report(sink, format!("{op}: {reason}"));
        self.monitor.log(
            LogLevel::ERROR.as_filtered(),
            format!("sink '{sink}' quarantined after {op}: {reason}"),
        );
    }
}

fn deactivate(monitor: &MonitorClient, slot: &mut ActiveSink) {
    let name = slot.sink.name().to_string();
    if let Err(reason) = guard(|| slot.sink.deactivate(monitor)) {
        tracing::warn!(sink = %name, %reason, "sink deactivation failed");
    }
}

/// Run one sink call, turning both errors and panics into a fault reason.
fn guard<T>(f: impl FnOnce() -> Result<T>) -> std::result::Result<T, String> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => Err(panic_message(panic)),
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic".to_string()
    }
}
