use crate::error::MarkerError;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::debug;

const MARKER_SUFFIX: &str = ".done";

/// Durable completion flags, keyed by marker id.
pub trait MarkerStore {
    /// Contents of the marker, or `None` if it was never written. Bytes that
    /// are not UTF-8 are replaced rather than rejected.
    fn read(&self, id: &str) -> Result<Option<String>, MarkerError>;

    fn create(&self, id: &str, fingerprint: &str) -> Result<(), MarkerError>;

    fn location(&self, id: &str) -> PathBuf;

    /// Whether the marker is present, regardless of what it contains.
    fn exists(&self, id: &str) -> Result<bool, MarkerError> {
        Ok(self.read(id)?.is_some())
    }
}

/// Stores each marker as `<dir>/<id>.done`.
pub struct DirMarkerStore {
    dir: PathBuf,
}

impl DirMarkerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn temp_location(&self, id: &str) -> PathBuf {
        self.dir.join(format!(".{id}{MARKER_SUFFIX}.tmp"))
    }

    fn write_atomically(&self, id: &str, fingerprint: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let tmp = self.temp_location(id);
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            writeln!(file, "{fingerprint}")?;
            file.sync_all()?;
        }
        fs::rename(&tmp, self.location(id))?;
        // Persist the rename itself; not every platform can open a directory.
        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }
        Ok(())
    }
}

impl MarkerStore for DirMarkerStore {
    fn read(&self, id: &str) -> Result<Option<String>, MarkerError> {
        let path = self.location(id);
        match fs::read(&path) {
            Ok(contents) => Ok(Some(String::from_utf8_lossy(&contents).trim().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(MarkerError::Read { path, source }),
        }
    }

    fn exists(&self, id: &str) -> Result<bool, MarkerError> {
        let path = self.location(id);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(true),
            Ok(_) => Err(MarkerError::Read {
                path,
                source: io::Error::new(io::ErrorKind::InvalidData, "not a regular file"),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(MarkerError::Read { path, source }),
        }
    }

    fn create(&self, id: &str, fingerprint: &str) -> Result<(), MarkerError> {
        self.write_atomically(id, fingerprint)
            .map_err(|source| MarkerError::Write {
                path: self.location(id),
                source,
            })?;
        debug!(marker = %self.location(id).display(), "marker written");
        Ok(())
    }

    fn location(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}{MARKER_SUFFIX}"))
    }
}
