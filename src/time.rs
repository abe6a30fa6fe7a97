use std::fmt;
use std::time::SystemTime;

/// A log timestamp: a UTC instant plus an 8-bit uniquifier.
///
/// Two entries from the same source can be produced inside the clock's
/// resolution; the uniquifier disambiguates them so that successive stamps
/// from one source are strictly increasing under the derived lexicographic
/// order. `(instant, uniquifier)` compares field by field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LogTime {
    nanos: u64,
    uniq: u8,
}

impl LogTime {
    /// The zero timestamp, used as the "no previous entry" marker.
    pub const ZERO: LogTime = LogTime { nanos: 0, uniq: 0 };

    /// The current wall clock with uniquifier 0.
    ///
    /// # Panics
    ///
    /// Panics if the system clock is set before the Unix epoch.
    pub fn now() -> LogTime {
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("SystemTime before Unix epoch")
            .as_nanos() as u64;
        LogTime { nanos, uniq: 0 }
    }

    /// The next timestamp strictly after `last` for a single source.
    ///
    /// `max(now, last)`, with the uniquifier bumped when the clock has not
    /// advanced past `last`. A saturated uniquifier advances the instant by
    /// one nanosecond instead, preserving strict growth.
    pub fn next_after(last: LogTime) -> LogTime {
        let now = LogTime::now();
        if now.nanos > last.nanos {
            now
        } else if last.uniq < u8::MAX {
            LogTime {
                nanos: last.nanos,
                uniq: last.uniq + 1,
            }
        } else {
            LogTime {
                nanos: last.nanos + 1,
                uniq: 0,
            }
        }
    }

    pub(crate) const fn from_parts(nanos: u64, uniq: u8) -> LogTime {
        LogTime { nanos, uniq }
    }

    /// Nanoseconds since the Unix epoch.
    pub fn nanos(self) -> u64 {
        self.nanos
    }

    pub fn uniquifier(self) -> u8 {
        self.uniq
    }

    pub fn is_zero(self) -> bool {
        self == LogTime::ZERO
    }
}

impl fmt::Display for LogTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let utc = chrono::DateTime::from_timestamp_nanos(self.nanos as i64);
        write!(f, "{}", utc.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;
        if self.uniq != 0 {
            write!(f, "({})", self.uniq)?;
        }
        Ok(())
    }
}
