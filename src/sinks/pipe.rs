use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::time::Duration;

use crate::codec::EntryWriter;
use crate::{MonitorClient, MulticastEntry, PipeConfig, Result, Sink, SinkConfig};

/// One-way byte-stream producer speaking the pipe protocol.
///
/// On activation: open the destination path (a FIFO on unix, or any
/// writable path) and write the stream-version header. Every entry goes out
/// in unicast form — the receiving process sees a single producer, monitor
/// attribution stays local. On deactivation: a single zero byte, flush,
/// clean close. A broken pipe is fatal to this sink only; the worker
/// quarantines it and the other sinks keep running.
pub struct PipeSink {
    config: PipeConfig,
    stream: Option<EntryWriter<BufWriter<File>>>,
}

impl PipeSink {
    pub(crate) fn new(config: PipeConfig) -> PipeSink {
        PipeSink {
            config,
            stream: None,
        }
    }
}

impl Sink for PipeSink {
    fn name(&self) -> &str {
        "pipe"
    }

    fn activate(&mut self, _monitor: &MonitorClient) -> Result<bool> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.config.path)?;
        let mut writer = EntryWriter::new(BufWriter::new(file));
        writer.write_header()?;
        writer.flush()?;
        self.stream = Some(writer);
        Ok(true)
    }

    fn apply_config(&mut self, config: &SinkConfig) -> Result<bool> {
        Ok(matches!(
            config,
            SinkConfig::Pipe(new) if new.path == self.config.path
        ))
    }

    fn handle(&mut self, _monitor: &MonitorClient, entry: &MulticastEntry) -> Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        stream.write_unicast(&entry.entry)?;
        Ok(())
    }

    fn on_timer(&mut self, _monitor: &MonitorClient, _period: Duration) -> Result<()> {
        if let Some(stream) = self.stream.as_mut() {
            stream.flush()?;
        }
        Ok(())
    }

    fn deactivate(&mut self, _monitor: &MonitorClient) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            stream.finish()?;
        }
        Ok(())
    }
}
