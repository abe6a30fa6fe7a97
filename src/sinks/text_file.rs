use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use crate::sinks::{file_stamp, render_entry};
use crate::{MonitorClient, MulticastEntry, Result, Sink, SinkConfig, TextFileConfig};

/// Writes human-readable log files.
///
/// One file per activation, written as `.tmp` and renamed to its final name
/// on clean deactivation; a `.tmp` left on disk marks an unclean stop.
pub struct TextFileSink {
    config: TextFileConfig,
    file: Option<OpenTextFile>,
}

struct OpenTextFile {
    writer: BufWriter<File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
}

impl TextFileSink {
    pub(crate) fn new(config: TextFileConfig) -> TextFileSink {
        TextFileSink { config, file: None }
    }

    fn open_file(&mut self) -> Result<()> {
        fs::create_dir_all(&self.config.directory)?;
        let name = format!("{}-{}", self.config.file_stem, file_stamp());
        let final_path = self.config.directory.join(format!("{name}.log"));
        let tmp_path = self.config.directory.join(format!("{name}.log.tmp"));
        let writer = BufWriter::new(File::create(&tmp_path)?);
        self.file = Some(OpenTextFile {
            writer,
            tmp_path,
            final_path,
        });
        Ok(())
    }

    fn close_file(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.writer.flush()?;
            drop(file.writer);
            fs::rename(&file.tmp_path, &file.final_path)?;
        }
        Ok(())
    }
}

impl Sink for TextFileSink {
    fn name(&self) -> &str {
        "text-file"
    }

    fn activate(&mut self, _monitor: &MonitorClient) -> Result<bool> {
        self.open_file()?;
        Ok(true)
    }

    fn apply_config(&mut self, config: &SinkConfig) -> Result<bool> {
        match config {
            SinkConfig::TextFile(new) if new.directory == self.config.directory => {
                self.config = new.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn handle(&mut self, _monitor: &MonitorClient, entry: &MulticastEntry) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        let mut line = String::new();
        render_entry(&mut line, entry);
        line.push('\n');
        file.writer.write_all(line.as_bytes())?;
        Ok(())
    }

    fn on_timer(&mut self, _monitor: &MonitorClient, _period: Duration) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.writer.flush()?;
        }
        Ok(())
    }

    fn deactivate(&mut self, _monitor: &MonitorClient) -> Result<()> {
        self.close_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Shared;
    use crate::Severity;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn test_monitor() -> (MonitorClient, mpsc::UnboundedReceiver<MulticastEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MonitorClient::new(Arc::new(Shared::new(tx))), rx)
    }

    #[test]
    fn writes_rename_and_leave_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let (monitor, mut queue) = test_monitor();
        monitor.log(Severity::Info, "first");
        monitor.log(Severity::Warn, "second");

        let mut sink = TextFileSink::new(TextFileConfig::new(dir.path()));
        assert!(sink.activate(&monitor).unwrap());
        while let Ok(entry) = queue.try_recv() {
            sink.handle(&monitor, &entry).unwrap();
        }
        sink.deactivate(&monitor).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".log"));
        assert!(!names[0].ends_with(".tmp"));

        let content = fs::read_to_string(dir.path().join(&names[0])).unwrap();
        assert!(content.contains("first"));
        assert!(content.contains("second"));
    }

    #[test]
    fn absorbs_same_directory_config_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = TextFileSink::new(TextFileConfig::new(dir.path()));

        let same = SinkConfig::TextFile(
            TextFileConfig::new(dir.path()).with_file_stem("renamed"),
        );
        assert!(sink.apply_config(&same).unwrap());
        assert_eq!(sink.config.file_stem, "renamed");

        let elsewhere = SinkConfig::TextFile(TextFileConfig::new(dir.path().join("sub")));
        assert!(!sink.apply_config(&elsewhere).unwrap());
    }
}
