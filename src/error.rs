use std::sync::Arc;

use crate::MonitorId;

/// The single error type for all logfan operations.
///
/// Every fallible logfan API returns `logfan::Result<T>` (alias for
/// `Result<T, logfan::Error>`). Errors from lower layers (IO, the codec,
/// sink drivers) are mapped into variants of this enum so callers only
/// need to handle one error type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The dispatcher has been stopped; no new clients can be created.
    #[error("dispatcher is disposed")]
    Disposed,

    #[error("IO error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// The stream could not be decoded at the given byte offset.
    ///
    /// Readers capture this and transition to their corrupt state; entries
    /// decoded before the offset remain available.
    #[error("corrupt stream at offset {offset}: {reason}")]
    Codec { offset: u64, reason: String },

    /// The 4-byte stream header carries a version this build cannot read.
    #[error("unsupported stream version {0}")]
    UnsupportedVersion(u32),

    /// A sink descriptor could not be turned into a running sink.
    #[error("sink configuration error: {0}")]
    Config(String),

    /// A seek landed on an entry that belongs to another monitor.
    #[error("entry at offset {offset} belongs to monitor {found}, expected {expected}")]
    WrongMonitor {
        offset: u64,
        expected: MonitorId,
        found: MonitorId,
    },

    /// The requested monitor or file is not part of the index.
    #[error("unknown monitor or file: {0}")]
    NotIndexed(String),
}

impl Error {
    pub(crate) fn codec(offset: u64, reason: impl Into<String>) -> Self {
        Error::Codec {
            offset,
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

/// Convenience alias for `Result<T, logfan::Error>`.
pub type Result<T = ()> = std::result::Result<T, Error>;
