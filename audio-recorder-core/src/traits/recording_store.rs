use std::io::{self, Seek, Write};
use std::path::PathBuf;

use crate::models::config::SampleEncoding;
use crate::models::recording_result::RecordingEntry;

/// A writable, seekable destination for one recording.
///
/// `flush` must make the written bytes durable before returning; the
/// output writer relies on it when finalizing a file.
pub trait RecordingSink: Write + Seek + Send {}

impl<T: Write + Seek + Send> RecordingSink for T {}

/// The storage directory recordings are written into.
///
/// The core only needs to create files, remove a file it failed to start,
/// and enumerate what's there.
pub trait RecordingStore: Send + Sync {
    /// Create a new file. Fails with `ErrorKind::AlreadyExists` if the
    /// name is taken.
    fn create(&self, file_name: &str) -> io::Result<Box<dyn RecordingSink>>;

    /// Delete a file, used to roll back a start that failed.
    fn remove(&self, file_name: &str) -> io::Result<()>;

    /// Files whose name ends with `suffix`, sorted by name.
    fn list(&self, suffix: &str) -> io::Result<Vec<RecordingEntry>>;

    /// Where `file_name` lives (or would live).
    fn path_of(&self, file_name: &str) -> PathBuf;

    /// Finished recordings of any encoding, sorted by name.
    fn recordings(&self) -> io::Result<Vec<RecordingEntry>> {
        let mut entries = Vec::new();
        for extension in SampleEncoding::FILE_EXTENSIONS {
            entries.extend(self.list(&format!(".{}", extension))?);
        }
        entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(entries)
    }
}
