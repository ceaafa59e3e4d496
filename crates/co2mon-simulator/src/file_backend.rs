//! Reading log kept in a regular file on the host.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use co2mon_core::storage::LogBackend;

pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn scratch_path(&self) -> PathBuf {
        let mut scratch = self.path.clone().into_os_string();
        scratch.push(".tmp");
        scratch.into()
    }
}

impl LogBackend for FileBackend {
    type Error = io::Error;

    fn ensure_exists(&mut self) -> Result<(), Self::Error> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(bytes)?;
        file.sync_all()
    }

    fn read_all(&mut self, buf: &mut Vec<u8>) -> Result<(), Self::Error> {
        *buf = fs::read(&self.path)?;
        Ok(())
    }

    /// Written beside the log and renamed over it, so a crash leaves either
    /// the old or the new contents.
    fn replace(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        let scratch = self.scratch_path();
        let mut file = File::create(&scratch)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&scratch, &self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_log(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("co2mon-{}-{}.txt", name, std::process::id()));
        let _ = fs::remove_file(&path);
        path
    }

    #[test]
    fn test_file_backend_roundtrip() {
        let path = temp_log("roundtrip");
        let mut backend = FileBackend::new(&path);
        let mut buf = Vec::new();

        assert!(backend.read_all(&mut buf).is_err());
        backend.ensure_exists().unwrap();
        backend.append(b"1,400.0\n").unwrap();
        backend.append(b"2,401.0\n").unwrap();
        backend.read_all(&mut buf).unwrap();
        assert_eq!(buf, b"1,400.0\n2,401.0\n");

        backend.replace(b"2,401.0\n").unwrap();
        backend.ensure_exists().unwrap();
        backend.read_all(&mut buf).unwrap();
        assert_eq!(buf, b"2,401.0\n");

        fs::remove_file(&path).unwrap();
    }
}
