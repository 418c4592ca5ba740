//! PID file exclusive lock (spec §4.7, §5 "PID file (exclusive)").
//!
//! Grounded on `other_examples`' daemon lifecycle module: open-without-
//! truncate, `fs2::FileExt::try_lock_exclusive` so a second instance fails
//! fast against the OS's own lock rather than racing on the file's
//! contents, then truncate-and-write the PID only once the lock is held.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct PidFile {
    path: PathBuf,
    file: File,
}

impl PidFile {
    /// Acquire the exclusive lock at `path`, failing fast if another live
    /// process already holds it (spec §4.7 "fail fast if another PID is
    /// alive"; §7 "PID-file contention" -> `AlreadyRunning`).
    pub fn acquire(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().write(true).create(true).truncate(false).open(path)?;
        file.try_lock_exclusive().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::WouldBlock, format!("{} is locked by a running instance", path.display()))
        })?;

        let mut file = file;
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.sync_all()?;

        Ok(Self { path: path.to_path_buf(), file })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_fails_while_first_is_held() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("daemon.pid");

        let _first = PidFile::acquire(&path).unwrap();
        assert!(PidFile::acquire(&path).is_err());
    }

    #[test]
    fn releasing_allows_reacquisition() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("daemon.pid");

        {
            let _first = PidFile::acquire(&path).unwrap();
        }
        assert!(PidFile::acquire(&path).is_ok());
    }
}
