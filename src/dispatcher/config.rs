use std::path::PathBuf;
use std::time::Duration;

use crate::sinks::{BinaryFileSink, ConsoleSink, PipeSink, TextFileSink};
use crate::{LevelFilter, LogFilter, Result, Sink};

/// Runtime configuration for a dispatcher.
///
/// Applied atomically by the worker: when several configurations are pending
/// at once, only the last one is materialised (see
/// [`Dispatcher::apply_config`](crate::Dispatcher::apply_config)). Use the
/// builder methods to customise, or [`Default`] for sensible defaults.
///
/// # Examples
///
/// ```rust
/// use logfan::{DispatcherConfig, LogFilter, SinkConfig, TextFileConfig};
///
/// let config = DispatcherConfig::default()
///     .with_minimal_filter(LogFilter::TERSE)
///     .with_timer_duration(std::time::Duration::from_millis(250))
///     .add_handler(SinkConfig::TextFile(TextFileConfig::new("logs/text")));
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DispatcherConfig {
    /// Period of the per-sink `on_timer` callback.
    /// Default: 500 ms
    pub timer_duration: Duration,

    /// Period of the dead-client sweep over the monitor registry.
    /// Default: 5 minutes
    pub external_timer_duration: Duration,

    /// Lower bound communicated to producers; combined with their own
    /// filters via [`LogFilter::combine`].
    /// Default: undefined
    pub minimal_filter: LogFilter,

    /// Threshold of the contextless external-log path. `Undefined` falls
    /// back to the process default filter's line part.
    /// Default: undefined
    pub external_filter: LevelFilter,

    /// Sink descriptors, in dispatch order.
    pub handlers: Vec<SinkConfig>,

    /// Re-emit every report of the process-wide critical-error collector
    /// through the external-log path, tagged `CriticalError`.
    /// Default: false
    pub handle_critical_errors: bool,

    /// Protocol internal: the configuration is already owned by the caller
    /// and may be stored without copying.
    /// Default: false
    #[cfg_attr(feature = "serde", serde(skip))]
    pub internal_clone: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            timer_duration: Duration::from_millis(500),
            external_timer_duration: Duration::from_secs(5 * 60),
            minimal_filter: LogFilter::UNDEFINED,
            external_filter: LevelFilter::Undefined,
            handlers: Vec::new(),
            handle_critical_errors: false,
            internal_clone: false,
        }
    }
}

impl DispatcherConfig {
    pub fn with_timer_duration(mut self, period: Duration) -> Self {
        self.timer_duration = period;
        self
    }

    pub fn with_external_timer_duration(mut self, period: Duration) -> Self {
        self.external_timer_duration = period;
        self
    }

    pub fn with_minimal_filter(mut self, filter: LogFilter) -> Self {
        self.minimal_filter = filter;
        self
    }

    pub fn with_external_filter(mut self, filter: LevelFilter) -> Self {
        self.external_filter = filter;
        self
    }

    /// Append a sink descriptor; dispatch order follows insertion order.
    pub fn add_handler(mut self, handler: SinkConfig) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_critical_errors(mut self, enabled: bool) -> Self {
        self.handle_critical_errors = enabled;
        self
    }
}

/// Descriptor of one sink.
///
/// The enum is the factory registry: every variant maps to exactly one sink
/// type, resolved by [`build`](Self::build) — a closed set, no runtime type
/// lookup. Reconfiguration identity is decided by the live sink's
/// [`Sink::apply_config`]: a sink that absorbs a descriptor in place is
/// preserved across configurations.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SinkConfig {
    TextFile(TextFileConfig),
    BinaryFile(BinaryFileConfig),
    Console(ConsoleConfig),
    Pipe(PipeConfig),
    #[cfg(test)]
    #[cfg_attr(feature = "serde", serde(skip))]
    Probe(crate::sinks::probe::ProbeSinkConfig),
}

impl SinkConfig {
    pub(crate) fn build(&self) -> Result<Box<dyn Sink>> {
        Ok(match self {
            SinkConfig::TextFile(config) => Box::new(TextFileSink::new(config.clone())),
            SinkConfig::BinaryFile(config) => Box::new(BinaryFileSink::new(config.clone())),
            SinkConfig::Console(config) => Box::new(ConsoleSink::new(config.clone())),
            SinkConfig::Pipe(config) => Box::new(PipeSink::new(config.clone())),
            #[cfg(test)]
            SinkConfig::Probe(config) => crate::sinks::probe::build(config)?,
        })
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            SinkConfig::TextFile(_) => "text-file",
            SinkConfig::BinaryFile(_) => "binary-file",
            SinkConfig::Console(_) => "console",
            SinkConfig::Pipe(_) => "pipe",
            #[cfg(test)]
            SinkConfig::Probe(_) => "probe",
        }
    }
}

/// Options of the human-readable text-file sink.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TextFileConfig {
    /// Directory the sink writes into; created on activation.
    pub directory: PathBuf,

    /// File name prefix.
    /// Default: "log"
    pub file_stem: String,
}

impl TextFileConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        TextFileConfig {
            directory: directory.into(),
            file_stem: "log".into(),
        }
    }

    pub fn with_file_stem(mut self, stem: impl Into<String>) -> Self {
        self.file_stem = stem.into();
        self
    }
}

/// Options of the binary-file sink.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BinaryFileConfig {
    /// Directory the sink writes into; created on activation.
    pub directory: PathBuf,

    /// Wrap the stream in gzip (same bytes, compressed; readers
    /// auto-detect).
    /// Default: false
    pub use_gzip_compression: bool,

    /// Rotate to a new file after this many entries.
    /// Default: none
    pub max_entries_per_file: Option<usize>,
}

impl BinaryFileConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        BinaryFileConfig {
            directory: directory.into(),
            use_gzip_compression: false,
            max_entries_per_file: None,
        }
    }

    pub fn with_gzip(mut self, enabled: bool) -> Self {
        self.use_gzip_compression = enabled;
        self
    }

    pub fn with_max_entries_per_file(mut self, limit: usize) -> Self {
        self.max_entries_per_file = Some(limit);
        self
    }
}

/// Options of the console sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConsoleConfig {
    /// Write to stderr instead of stdout.
    /// Default: false
    pub use_stderr: bool,
}

/// Options of the inter-process pipe sink.
///
/// The destination is any writable byte-stream path (a FIFO on unix, or a
/// plain file). The sink writes the stream-version header on activation and
/// a single zero byte followed by a clean close on deactivation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PipeConfig {
    pub path: PathBuf,
}

impl PipeConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        PipeConfig { path: path.into() }
    }
}
