use std::io::{self, Write};

use crate::sinks::render_entry;
use crate::{ConsoleConfig, MonitorClient, MulticastEntry, Result, Sink, SinkConfig};

/// Writes formatted entries to stdout or stderr.
///
/// Colouring is left to the host application; the rendering here matches
/// the text-file sink line for line.
pub struct ConsoleSink {
    config: ConsoleConfig,
}

impl ConsoleSink {
    pub(crate) fn new(config: ConsoleConfig) -> ConsoleSink {
        ConsoleSink { config }
    }
}

impl Sink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    fn activate(&mut self, _monitor: &MonitorClient) -> Result<bool> {
        Ok(true)
    }

    fn apply_config(&mut self, config: &SinkConfig) -> Result<bool> {
        match config {
            SinkConfig::Console(new) => {
                self.config = *new;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn handle(&mut self, _monitor: &MonitorClient, entry: &MulticastEntry) -> Result<()> {
        let mut line = String::new();
        render_entry(&mut line, entry);
        line.push('\n');
        if self.config.use_stderr {
            io::stderr().lock().write_all(line.as_bytes())?;
        } else {
            io::stdout().lock().write_all(line.as_bytes())?;
        }
        Ok(())
    }
}
