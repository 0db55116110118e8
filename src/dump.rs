//! Raw PCM dumps of synthesized audio, one file per request.

use crate::defaults;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Buffered append-only writer for one dump file.
#[derive(Debug)]
pub struct PcmWriter {
    path: PathBuf,
    buffer: Vec<u8>,
    buffer_size: usize,
}

impl PcmWriter {
    pub fn new(path: PathBuf, buffer_size: usize) -> Self {
        Self {
            path,
            buffer: Vec::with_capacity(buffer_size),
            buffer_size,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Buffers `data`, writing to disk once the buffer is full.
    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.buffer.extend_from_slice(data);
        if self.buffer.len() >= self.buffer_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Appends everything buffered to the file.
    pub fn flush(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&self.buffer)?;
        self.buffer.clear();
        Ok(())
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Routes audio bytes to per-request [`PcmWriter`]s named
/// `<vendor>_dump_<request_id>.pcm`.
#[derive(Debug)]
pub struct PcmDumper {
    dir: PathBuf,
    vendor: String,
    writers: HashMap<String, PcmWriter>,
}

impl PcmDumper {
    pub fn new(dir: impl Into<PathBuf>, vendor: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            vendor: vendor.into(),
            writers: HashMap::new(),
        }
    }

    /// Dump file of `request_id`. Path separators in the id are replaced
    /// so the file always lands inside the dump directory.
    pub fn path_for(&self, request_id: &str) -> PathBuf {
        let safe_id: String = request_id
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
            .collect();
        self.dir
            .join(format!("{}_dump_{}.pcm", self.vendor, safe_id))
    }

    /// Flushes and drops writers of every other request.
    pub fn start_request(&mut self, request_id: &str) {
        let stale: Vec<String> = self
            .writers
            .keys()
            .filter(|id| id.as_str() != request_id)
            .cloned()
            .collect();
        for id in stale {
            if let Some(mut writer) = self.writers.remove(&id) {
                flush_logged(&mut writer);
            }
        }
    }

    pub fn write(&mut self, request_id: &str, data: &[u8]) {
        if !self.writers.contains_key(request_id) {
            let path = self.path_for(request_id);
            tracing::debug!(request_id, path = %path.display(), "Opening PCM dump");
            self.writers.insert(
                request_id.to_string(),
                PcmWriter::new(path, defaults::DUMP_BUFFER_BYTES),
            );
        }
        if let Some(writer) = self.writers.get_mut(request_id)
            && let Err(e) = writer.write(data)
        {
            tracing::warn!(request_id, "PCM dump write failed: {}", e);
        }
    }

    /// Flushes every writer and forgets them.
    pub fn flush_all(&mut self) {
        for (_, mut writer) in self.writers.drain() {
            flush_logged(&mut writer);
        }
    }

    pub fn open_count(&self) -> usize {
        self.writers.len()
    }
}

fn flush_logged(writer: &mut PcmWriter) {
    if let Err(e) = writer.flush() {
        tracing::warn!(path = %writer.path().display(), "PCM dump flush failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writer_buffers_until_threshold() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.pcm");
        let mut writer = PcmWriter::new(path.clone(), 4);

        writer.write(&[1, 2]).unwrap();
        assert_eq!(writer.buffered(), 2);
        assert!(!path.exists());

        writer.write(&[3, 4, 5]).unwrap();
        assert_eq!(writer.buffered(), 0);
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn dump_path_stays_inside_directory() {
        let dir = TempDir::new().unwrap();
        let dumper = PcmDumper::new(dir.path(), "acme");

        let path = dumper.path_for("../escape/x");
        assert_eq!(path.parent(), Some(dir.path()));
        assert_eq!(path, dir.path().join("acme_dump_.._escape_x.pcm"));
        assert_eq!(
            dumper.path_for("a\\b").file_name().and_then(|n| n.to_str()),
            Some("acme_dump_a_b.pcm")
        );
    }

    #[test]
    fn writer_appends_across_flushes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.pcm");
        let mut writer = PcmWriter::new(path.clone(), 1024);
        writer.write(&[1]).unwrap();
        writer.flush().unwrap();
        writer.write(&[2]).unwrap();
        writer.flush().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2]);
    }

    #[test]
    fn dumper_names_files_by_vendor_and_request() {
        let dir = TempDir::new().unwrap();
        let mut dumper = PcmDumper::new(dir.path(), "acme");
        dumper.write("r1", &[0, 1]);
        dumper.flush_all();

        let expected = dir.path().join("acme_dump_r1.pcm");
        assert_eq!(dumper.path_for("r1"), expected);
        assert_eq!(std::fs::read(expected).unwrap(), vec![0, 1]);
        assert_eq!(dumper.open_count(), 0);
    }

    #[test]
    fn start_request_flushes_previous_writers() {
        let dir = TempDir::new().unwrap();
        let mut dumper = PcmDumper::new(dir.path(), "acme");
        dumper.write("r1", &[7, 7]);
        dumper.start_request("r2");
        assert_eq!(dumper.open_count(), 0);
        assert_eq!(
            std::fs::read(dir.path().join("acme_dump_r1.pcm")).unwrap(),
            vec![7, 7]
        );
    }

    #[test]
    fn unwritable_directory_is_not_fatal() {
        let mut dumper = PcmDumper::new("/nonexistent/ttsflow/dumps", "acme");
        dumper.write("r1", &[1, 2]);
        dumper.flush_all();
    }
}
