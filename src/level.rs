use std::fmt;

/// Severity of a log entry, most verbose first.
///
/// The ordering is total: `Debug < Trace < Info < Warn < Error < Fatal`.
/// Filters compare against this ordering, see [`LevelFilter::allows`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Severity {
    Debug,
    Trace,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    /// The wire bit for this severity (one bit per severity, `Debug` lowest).
    pub(crate) fn bit(self) -> u16 {
        1 << self as u16
    }

    pub(crate) fn from_bit(bit: u16) -> Option<Severity> {
        Some(match bit {
            0x01 => Severity::Debug,
            0x02 => Severity::Trace,
            0x04 => Severity::Info,
            0x08 => Severity::Warn,
            0x10 => Severity::Error,
            0x20 => Severity::Fatal,
            _ => return None,
        })
    }

    /// Lowercase label, used by the text renderers.
    pub fn label(self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Trace => "trace",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A severity plus the *filtered* marker.
///
/// The marker means "upstream already decided this must be emitted": gates
/// such as the external-log filter let a filtered level through
/// unconditionally. The codec preserves the marker bit-for-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LogLevel {
    severity: Severity,
    filtered: bool,
}

const FILTERED_BIT: u16 = 0x40;

impl LogLevel {
    pub const DEBUG: LogLevel = LogLevel::new(Severity::Debug);
    pub const TRACE: LogLevel = LogLevel::new(Severity::Trace);
    pub const INFO: LogLevel = LogLevel::new(Severity::Info);
    pub const WARN: LogLevel = LogLevel::new(Severity::Warn);
    pub const ERROR: LogLevel = LogLevel::new(Severity::Error);
    pub const FATAL: LogLevel = LogLevel::new(Severity::Fatal);

    pub const fn new(severity: Severity) -> LogLevel {
        LogLevel {
            severity,
            filtered: false,
        }
    }

    /// The same severity with the filtered marker set.
    pub const fn as_filtered(self) -> LogLevel {
        LogLevel {
            severity: self.severity,
            filtered: true,
        }
    }

    pub fn severity(self) -> Severity {
        self.severity
    }

    pub fn is_filtered(self) -> bool {
        self.filtered
    }

    pub(crate) fn to_bits(self) -> u16 {
        self.severity.bit() | if self.filtered { FILTERED_BIT } else { 0 }
    }

    pub(crate) fn from_bits(bits: u16) -> Option<LogLevel> {
        let severity = Severity::from_bit(bits & !FILTERED_BIT)?;
        Some(LogLevel {
            severity,
            filtered: bits & FILTERED_BIT != 0,
        })
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::TRACE
    }
}

impl From<Severity> for LogLevel {
    fn from(severity: Severity) -> Self {
        LogLevel::new(severity)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.filtered {
            write!(f, "{}!", self.severity)
        } else {
            self.severity.fmt(f)
        }
    }
}

/// A severity threshold.
///
/// `Undefined` delegates the decision to the caller's fallback (the process
/// default filter for the external path); `Off` rejects everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LevelFilter {
    #[default]
    Undefined,
    Debug,
    Trace,
    Info,
    Warn,
    Error,
    Fatal,
    Off,
}

impl LevelFilter {
    fn threshold(self) -> Option<Severity> {
        Some(match self {
            LevelFilter::Undefined => return None,
            LevelFilter::Debug => Severity::Debug,
            LevelFilter::Trace => Severity::Trace,
            LevelFilter::Info => Severity::Info,
            LevelFilter::Warn => Severity::Warn,
            LevelFilter::Error => Severity::Error,
            LevelFilter::Fatal => Severity::Fatal,
            LevelFilter::Off => return None,
        })
    }

    /// Returns `true` when an entry of the given severity passes this filter.
    ///
    /// `Undefined` lets everything through (resolve the fallback before
    /// calling this when `Undefined` must defer), `Off` nothing.
    pub fn allows(self, severity: Severity) -> bool {
        match self {
            LevelFilter::Undefined => true,
            LevelFilter::Off => false,
            _ => severity >= self.threshold().expect("defined filter"),
        }
    }

    /// The more verbose of the two filters; `Undefined` yields to the other.
    pub fn combine(self, other: LevelFilter) -> LevelFilter {
        match (self, other) {
            (LevelFilter::Undefined, o) => o,
            (s, LevelFilter::Undefined) => s,
            (LevelFilter::Off, o) => o,
            (s, LevelFilter::Off) => s,
            (s, o) => {
                // Both defined: keep the lower threshold.
                if s.threshold() <= o.threshold() {
                    s
                } else {
                    o
                }
            }
        }
    }
}

/// A `{group, line}` filter pair.
///
/// `group` gates group openings, `line` standalone lines. The named presets
/// are the ones configuration files refer to by name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LogFilter {
    pub group: LevelFilter,
    pub line: LevelFilter,
}

impl LogFilter {
    pub const UNDEFINED: LogFilter = LogFilter::new(LevelFilter::Undefined, LevelFilter::Undefined);
    pub const DEBUG: LogFilter = LogFilter::new(LevelFilter::Debug, LevelFilter::Debug);
    pub const TRACE: LogFilter = LogFilter::new(LevelFilter::Trace, LevelFilter::Trace);
    pub const VERBOSE: LogFilter = LogFilter::new(LevelFilter::Trace, LevelFilter::Info);
    pub const MONITOR: LogFilter = LogFilter::new(LevelFilter::Trace, LevelFilter::Warn);
    pub const TERSE: LogFilter = LogFilter::new(LevelFilter::Info, LevelFilter::Warn);
    pub const RELEASE: LogFilter = LogFilter::new(LevelFilter::Error, LevelFilter::Error);
    pub const OFF: LogFilter = LogFilter::new(LevelFilter::Off, LevelFilter::Off);

    pub const fn new(group: LevelFilter, line: LevelFilter) -> LogFilter {
        LogFilter { group, line }
    }

    /// Component-wise [`LevelFilter::combine`]: the more verbose side wins.
    pub fn combine(self, other: LogFilter) -> LogFilter {
        LogFilter {
            group: self.group.combine(other.group),
            line: self.line.combine(other.line),
        }
    }

    pub fn is_undefined(self) -> bool {
        self == LogFilter::UNDEFINED
    }
}

impl fmt::Display for LogFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{:?}, {:?}}}", self.group, self.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_bits_round_trip() {
        for severity in [
            Severity::Debug,
            Severity::Trace,
            Severity::Info,
            Severity::Warn,
            Severity::Error,
            Severity::Fatal,
        ] {
            assert_eq!(Severity::from_bit(severity.bit()), Some(severity));
        }
        assert_eq!(Severity::from_bit(0x03), None);
        assert_eq!(Severity::from_bit(0), None);
    }

    #[test]
    fn filtered_bit_survives_encoding() {
        let plain = LogLevel::WARN;
        let filtered = LogLevel::WARN.as_filtered();

        assert_ne!(plain.to_bits(), filtered.to_bits());
        assert_eq!(LogLevel::from_bits(plain.to_bits()), Some(plain));
        assert_eq!(LogLevel::from_bits(filtered.to_bits()), Some(filtered));
        assert!(LogLevel::from_bits(filtered.to_bits()).unwrap().is_filtered());
    }

    #[test]
    fn filter_allows_by_threshold() {
        assert!(LevelFilter::Info.allows(Severity::Warn));
        assert!(LevelFilter::Info.allows(Severity::Info));
        assert!(!LevelFilter::Info.allows(Severity::Trace));
        assert!(!LevelFilter::Off.allows(Severity::Fatal));
        assert!(LevelFilter::Undefined.allows(Severity::Debug));
    }

    #[test]
    fn combine_keeps_the_verbose_side() {
        assert_eq!(
            LevelFilter::Info.combine(LevelFilter::Trace),
            LevelFilter::Trace
        );
        assert_eq!(
            LevelFilter::Undefined.combine(LevelFilter::Error),
            LevelFilter::Error
        );
        let combined = LogFilter::RELEASE.combine(LogFilter::VERBOSE);
        assert_eq!(combined, LogFilter::VERBOSE);
    }
}
