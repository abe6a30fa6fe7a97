#![cfg_attr(docsrs, feature(doc_cfg))]
//! # logfan
//!
//! A structured activity-logging pipeline: many producers emit hierarchical
//! log events, and a single background dispatcher fans them out to pluggable
//! sinks — text files, binary files (optionally gzipped), the console, and
//! inter-process pipes. The binary files are replayable: a multi-file reader
//! reconstructs every producer's activity from interleaved streams.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use logfan::{
//!     BinaryFileConfig, Dispatcher, DispatcherConfig, Severity, SinkConfig, TextFileConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> logfan::Result {
//!     let dispatcher = Dispatcher::new(
//!         DispatcherConfig::default()
//!             .add_handler(SinkConfig::TextFile(TextFileConfig::new("logs/text")))
//!             .add_handler(SinkConfig::BinaryFile(
//!                 BinaryFileConfig::new("logs/bin").with_gzip(true),
//!             )),
//!     );
//!
//!     let client = dispatcher.ensure_client()?;
//!     {
//!         let group = client.open_group(Severity::Info, "startup");
//!         client.log(Severity::Info, "configuration loaded");
//!         group.conclude(["ready"]);
//!     }
//!
//!     dispatcher.finalize(std::time::Duration::from_secs(5)).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Core Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Dispatcher`] | Background worker owning the sinks; submit/reconfigure/stop |
//! | [`MonitorClient`] | Per-producer client: monotone stamps, group depth, back-pointers |
//! | [`GroupScope`] | RAII handle closing its group on drop |
//! | [`Sink`] | Contract a sink implements (activate/handle/on_timer/deactivate) |
//! | [`SinkConfig`] | Closed descriptor set, one variant per built-in sink |
//! | [`LogEntry`] / [`MulticastEntry`] | The event model persisted by the codec |
//! | [`codec::EntryReader`] | Forward reader tolerating truncated tails |
//! | [`activity::MultiLogReader`] | Merged per-monitor index over many files |
//!
//! ## Delivery model
//!
//! Producers never block and never fail: submission is a lock-free enqueue,
//! and entries submitted after [`Dispatcher::stop`] are silently dropped.
//! [`Dispatcher::finalize`] bounds shutdown — past its deadline the queue is
//! abandoned rather than drained. Within one producer, order is preserved
//! everywhere: every sink sees that producer's entries in emission order,
//! and every file stores them at increasing offsets.
//!
//! ## Features
//!
//! - **`serde`** - serialization derives on configuration and model types

mod entry;
mod error;
mod exception;
mod level;
mod tag;
mod time;

pub mod activity;
pub mod codec;
pub mod sinks;

mod dispatcher;

pub use dispatcher::{
    critical, default_dispatcher, default_filter, dispose_default, ensure_default, external_log,
    set_default_filter, BinaryFileConfig, ConsoleConfig, CriticalError, CriticalErrorSubscription,
    Dispatcher, DispatcherConfig, GroupScope, MonitorClient, PipeConfig, Sink, SinkConfig,
    TextFileConfig,
};
pub use entry::{EntryData, EntryKind, LogEntry, MonitorId, MulticastEntry};
pub use error::{Error, Result};
pub use exception::ExceptionData;
pub use level::{LevelFilter, LogFilter, LogLevel, Severity};
pub use tag::{Tag, TagSet};
pub use time::LogTime;
