use std::time::Duration;

use crate::{MonitorClient, MulticastEntry, Result, SinkConfig};

/// A consumer of dispatched entries, owned exclusively by the worker.
///
/// Every callback runs on the worker and receives the worker's private
/// monitor: a sink may emit self-diagnostics into it, and those entries
/// re-enter the queue like any producer's (the worker registers its own
/// monitor at startup).
///
/// Any error — or panic — returned from a callback quarantines the sink:
/// the worker reports the fault, deactivates the sink once, and carries on
/// with the remaining sinks.
pub trait Sink: Send {
    /// Short name used in diagnostics and fault reports.
    fn name(&self) -> &str;

    /// Acquire resources. Returning `Ok(false)` means "do not add me" and
    /// is not a fault.
    fn activate(&mut self, monitor: &MonitorClient) -> Result<bool>;

    /// Absorb a new descriptor in place, returning `Ok(true)` when this
    /// sink now implements it. Must leave the sink untouched when it
    /// returns `Ok(false)`: the worker will then deactivate this sink and
    /// build a fresh one from the descriptor.
    fn apply_config(&mut self, config: &SinkConfig) -> Result<bool>;

    /// Consume one entry. May buffer; must not block the worker
    /// indefinitely.
    fn handle(&mut self, monitor: &MonitorClient, entry: &MulticastEntry) -> Result<()>;

    /// Periodic flush/rotate hook; `period` is the configured timer
    /// duration.
    fn on_timer(&mut self, monitor: &MonitorClient, period: Duration) -> Result<()> {
        let _m = monitor;
        let _p = period;
        Ok(())
    }

    /// Release resources. Called exactly once per activated sink, on
    /// replacement, quarantine or shutdown.
    fn deactivate(&mut self, monitor: &MonitorClient) -> Result<()> {
        let _m = monitor;
        Ok(())
    }
}
