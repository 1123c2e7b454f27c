use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::models::error::RecorderError;
use crate::models::recording_result::RecordingEntry;
use crate::traits::recording_store::{RecordingSink, RecordingStore};

/// How many `_N` suffixes to try before giving up on a file name.
pub const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Build the file name for a recording started at `started_at`.
///
/// `attempt` 0 gives `<YYYYMMDD_HHMMSS>.<ext>`; later attempts append
/// `_<attempt>` so two sessions in the same second don't collide.
pub fn recording_file_name(started_at: &DateTime<Local>, extension: &str, attempt: u32) -> String {
    let stem = started_at.format("%Y%m%d_%H%M%S");
    if attempt == 0 {
        format!("{}.{}", stem, extension)
    } else {
        format!("{}_{}.{}", stem, attempt, extension)
    }
}

/// Recordings folder on the local filesystem.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Wrap an existing directory without touching it.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory if needed and check that it is writable.
    ///
    /// Meant to run once at startup, before any session is started.
    pub fn prepare(root: impl Into<PathBuf>) -> Result<Self, RecorderError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            RecorderError::FileCreate(format!("cannot create folder {}: {}", root.display(), e))
        })?;

        let probe = root.join(".write-probe");
        File::create(&probe)
            .and_then(|_| fs::remove_file(&probe))
            .map_err(|e| {
                RecorderError::FileCreate(format!("folder is not writable {}: {}", root.display(), e))
            })?;

        log::debug!("Recordings folder ready: {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl RecordingStore for DirectoryStore {
    fn create(&self, file_name: &str) -> io::Result<Box<dyn RecordingSink>> {
        let file = OpenOptions::new()
            .write(true)
            .read(true)
            .create_new(true)
            .open(self.root.join(file_name))?;
        Ok(Box::new(DurableFile {
            inner: BufWriter::new(file),
        }))
    }

    fn remove(&self, file_name: &str) -> io::Result<()> {
        fs::remove_file(self.root.join(file_name))
    }

    fn list(&self, suffix: &str) -> io::Result<Vec<RecordingEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let file_name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            if !file_name.ends_with(suffix) {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            entries.push(RecordingEntry {
                path: entry.path(),
                file_name,
                size_bytes: metadata.len(),
            });
        }
        entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(entries)
    }

    fn path_of(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }
}

/// Buffered file whose `flush` also syncs to disk.
struct DurableFile {
    inner: BufWriter<File>,
}

impl Write for DurableFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()?;
        self.inner.get_ref().sync_all()
    }
}

impl Seek for DurableFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}
