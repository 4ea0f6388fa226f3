use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Append-only log file that survives rotation.
///
/// When the file is renamed away the next write recreates it at the original
/// path, so the rotator never has to signal the writer.
#[derive(Debug)]
pub struct LogFile {
    path: PathBuf,
    file: File,
}

impl LogFile {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = open_append(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reopen_if_moved(&mut self) -> io::Result<()> {
        if !self.path.exists() {
            self.file.flush()?;
            self.file = open_append(&self.path)?;
        }
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Write for LogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.reopen_if_moved()?;
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_to_existing_content() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("daemon.log");
        std::fs::write(&path, "first\n").unwrap();

        let mut log = LogFile::open(&path).unwrap();
        log.write_all(b"second\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn reopens_after_rename() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("daemon.log");
        let rotated = temp.path().join("daemon.2024-01-01-00.log");

        let mut log = LogFile::open(&path).unwrap();
        log.write_all(b"before\n").unwrap();
        std::fs::rename(&path, &rotated).unwrap();
        log.write_all(b"after\n").unwrap();
        log.flush().unwrap();

        assert_eq!(std::fs::read_to_string(&rotated).unwrap(), "before\n");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "after\n");
    }
}
