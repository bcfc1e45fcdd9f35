//! Local delivery sinks: stdout, an append-only JSONL file, and a
//! one-file-per-event directory.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    os::fd::AsRawFd,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use procaudit_core::{
    event::Event,
    sink::{EventSink, SinkError},
};

/// Writes one compact JSON line per event to standard output.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl StdoutSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventSink for StdoutSink {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn write(&mut self, event: &Event) -> Result<(), SinkError> {
        let line = encode_line(event)?;
        let mut stdout = io::stdout().lock();
        stdout.write_all(&line).map_err(SinkError::transient)?;
        stdout.flush().map_err(SinkError::transient)?;
        Ok(())
    }
}

/// Appends one JSON line per event to a single file.
///
/// Appends are serialized through an exclusive lock on a sibling
/// `<path>.lock` file, so concurrent writers (including other monitor
/// processes) never interleave partial lines.
#[derive(Debug)]
pub struct JsonlFileSink {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonlFileSink {
    /// Missing parent directories are created here, at wiring time, so
    /// a misconfigured path fails the run instead of every write.
    pub fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        Ok(Self {
            path,
            lock_path: lock_path.into(),
        })
    }
}

#[async_trait]
impl EventSink for JsonlFileSink {
    fn name(&self) -> &str {
        "jsonl-file"
    }

    async fn write(&mut self, event: &Event) -> Result<(), SinkError> {
        let line = encode_line(event)?;
        let _guard = FileLock::acquire(&self.lock_path).map_err(SinkError::transient)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(SinkError::transient)?;
        // One write call per line; readers under the lock never see a
        // torn record.
        file.write_all(&line).map_err(SinkError::transient)?;
        file.flush().map_err(SinkError::transient)?;
        Ok(())
    }
}

/// Writes each event to `<directory>/<event id>.json`, overwriting any
/// previous file of the same name.
#[derive(Debug)]
pub struct DirectorySink {
    directory: PathBuf,
}

impl DirectorySink {
    pub fn new(directory: impl Into<PathBuf>) -> io::Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }
}

#[async_trait]
impl EventSink for DirectorySink {
    fn name(&self) -> &str {
        "directory"
    }

    async fn write(&mut self, event: &Event) -> Result<(), SinkError> {
        let body = serde_json::to_vec(event).map_err(SinkError::transient)?;
        let path = self.directory.join(format!("{}.json", event.header().id));
        fs::write(&path, body).map_err(SinkError::transient)?;
        Ok(())
    }
}

fn encode_line(event: &Event) -> Result<Vec<u8>, SinkError> {
    let mut line = serde_json::to_vec(event).map_err(SinkError::transient)?;
    line.push(b'\n');
    Ok(line)
}

/// Exclusive advisory lock on a file, held until drop.
struct FileLock {
    file: File,
}

impl FileLock {
    fn acquire(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).write(true).open(path)?;
        // Blocks until the lock is granted. Writes are small, so the
        // wait is short even under contention.
        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) } != 0 {
            log::warn!(
                "failed to release file lock: {}",
                io::Error::last_os_error()
            );
        }
    }
}
