use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Destination for pipeline progress lines.
pub trait Output {
    fn print(&mut self, text: &str);
}

pub struct StdErrOutput;

impl StdErrOutput {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StdErrOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl Output for StdErrOutput {
    fn print(&mut self, text: &str) {
        eprintln!("{}", text);
    }
}

pub struct FileOutput {
    file: File,
}

impl FileOutput {
    pub fn new(path: &Path, append: bool) -> Result<Self> {
        let file = if append {
            OpenOptions::new().create(true).append(true).open(path)
        } else {
            File::create(path)
        }
        .with_context(|| format!("{}: cannot open file", path.display()))?;

        Ok(Self { file })
    }
}

impl Output for FileOutput {
    fn print(&mut self, text: &str) {
        let _ = writeln!(self.file, "{}", text);
    }
}

/// Keeps lines in memory; clones share the same buffer.
#[derive(Clone, Default)]
pub struct BufferOutput {
    lines: Arc<Mutex<Vec<String>>>,
}

impl BufferOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl Output for BufferOutput {
    fn print(&mut self, text: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(text.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_buffer_shared_between_clones() {
        let buffer = BufferOutput::new();
        let mut writer = buffer.clone();
        writer.print("one");
        writer.print("two");
        assert_eq!(buffer.lines(), vec!["one", "two"]);
    }

    #[test]
    fn test_file_output_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.log");
        FileOutput::new(&path, false).unwrap().print("first");
        FileOutput::new(&path, true).unwrap().print("second");
        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_file_output_bad_path() {
        let dir = TempDir::new().unwrap();
        let err = FileOutput::new(&dir.path().join("missing/progress.log"), false)
            .err()
            .unwrap();
        assert!(err.to_string().ends_with("cannot open file"));
    }
}
