use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use flate2::write::GzEncoder;

use crate::codec::{gzip_encoder, EntryWriter};
use crate::sinks::file_stamp;
use crate::{BinaryFileConfig, MonitorClient, MulticastEntry, Result, Sink, SinkConfig};

/// Writes the framed binary format, optionally gzipped, with rotation.
///
/// Files are written as `.tmp` and renamed on close; every closed file ends
/// with the end-of-file sentinel, so readers report a clean end.
pub struct BinaryFileSink {
    config: BinaryFileConfig,
    current: Option<OpenBinaryFile>,
    entries_in_file: usize,
}

struct OpenBinaryFile {
    writer: EntryWriter<FileStream>,
    tmp_path: PathBuf,
    final_path: PathBuf,
}

/// Plain or gzip output; the gzip trailer needs an explicit finish.
enum FileStream {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl Write for FileStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            FileStream::Plain(w) => w.write(buf),
            FileStream::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            FileStream::Plain(w) => w.flush(),
            FileStream::Gzip(w) => w.flush(),
        }
    }
}

impl FileStream {
    fn close(self) -> Result<()> {
        match self {
            FileStream::Plain(mut w) => w.flush()?,
            FileStream::Gzip(encoder) => {
                let mut w = encoder.finish()?;
                w.flush()?;
            }
        }
        Ok(())
    }
}

impl BinaryFileSink {
    pub(crate) fn new(config: BinaryFileConfig) -> BinaryFileSink {
        BinaryFileSink {
            config,
            current: None,
            entries_in_file: 0,
        }
    }

    fn open_file(&mut self) -> Result<()> {
        fs::create_dir_all(&self.config.directory)?;
        let name = file_stamp();
        let final_path = self.config.directory.join(format!("{name}.lfb"));
        let tmp_path = self.config.directory.join(format!("{name}.lfb.tmp"));
        let file = BufWriter::new(File::create(&tmp_path)?);
        let stream = if self.config.use_gzip_compression {
            FileStream::Gzip(gzip_encoder(file))
        } else {
            FileStream::Plain(file)
        };
        let mut writer = EntryWriter::new(stream);
        writer.write_header()?;
        self.current = Some(OpenBinaryFile {
            writer,
            tmp_path,
            final_path,
        });
        self.entries_in_file = 0;
        Ok(())
    }

    fn close_file(&mut self) -> Result<()> {
        if let Some(file) = self.current.take() {
            file.writer.finish()?.close()?;
            fs::rename(&file.tmp_path, &file.final_path)?;
        }
        Ok(())
    }
}

impl Sink for BinaryFileSink {
    fn name(&self) -> &str {
        "binary-file"
    }

    fn activate(&mut self, _monitor: &MonitorClient) -> Result<bool> {
        self.open_file()?;
        Ok(true)
    }

    fn apply_config(&mut self, config: &SinkConfig) -> Result<bool> {
        match config {
            SinkConfig::BinaryFile(new)
                if new.directory == self.config.directory
                    && new.use_gzip_compression == self.config.use_gzip_compression =>
            {
                self.config = new.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn handle(&mut self, _monitor: &MonitorClient, entry: &MulticastEntry) -> Result<()> {
        if self.current.is_none() {
            return Ok(());
        }
        if let Some(limit) = self.config.max_entries_per_file {
            if self.entries_in_file >= limit {
                self.close_file()?;
                self.open_file()?;
            }
        }
        let file = self.current.as_mut().expect("opened above");
        file.writer.write_multicast(entry)?;
        self.entries_in_file += 1;
        Ok(())
    }

    fn on_timer(&mut self, _monitor: &MonitorClient, _period: Duration) -> Result<()> {
        if let Some(file) = self.current.as_mut() {
            file.writer.flush()?;
        }
        Ok(())
    }

    fn deactivate(&mut self, _monitor: &MonitorClient) -> Result<()> {
        self.close_file()
    }
}
