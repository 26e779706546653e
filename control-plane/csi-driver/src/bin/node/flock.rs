//! Cross-process mutual exclusion for per-device attach sequences, over an
//! advisory exclusive non-blocking file lock.

use crate::error::{self, NodeError};
use nix::{errno::Errno, fcntl::FlockArg};
use snafu::ResultExt;
use std::{
    fs::{File, OpenOptions},
    os::unix::{fs::OpenOptionsExt, io::AsRawFd},
    path::{Path, PathBuf},
};
use tracing::warn;

/// A path-based exclusive lock. The lock is released by [`Flock::unlock`]
/// or when the value is dropped.
pub(crate) struct Flock {
    path: PathBuf,
    file: Option<File>,
}

impl Flock {
    pub(crate) fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
        }
    }

    /// Create (0600) or open the lock file and acquire the exclusive lock
    /// without blocking. A lock held elsewhere fails with
    /// [`NodeError::Busy`].
    pub(crate) fn lock(&mut self) -> Result<(), NodeError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o600)
            .open(&self.path)
            .context(error::LockFile {
                path: self.path.display().to_string(),
            })?;

        match nix::fcntl::flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => {
                self.file = Some(file);
                Ok(())
            }
            Err(Errno::EWOULDBLOCK) => Err(NodeError::Busy {
                path: self.path.display().to_string(),
            }),
            Err(errno) => Err(NodeError::LockFailed {
                path: self.path.display().to_string(),
                errno,
            }),
        }
    }

    /// Release and close the lock file.
    pub(crate) fn unlock(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        if let Err(errno) = nix::fcntl::flock(file.as_raw_fd(), FlockArg::Unlock) {
            warn!(path = %self.path.display(), %errno, "failed to release file lock");
        }
    }
}

impl Drop for Flock {
    fn drop(&mut self) {
        self.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::Flock;
    use crate::error::NodeError;

    fn lock_path(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("csi-node-flock-{}-{tag}", std::process::id()))
    }

    #[test]
    fn second_lock_on_a_held_file_is_busy() {
        let path = lock_path("busy");
        let mut first = Flock::new(&path);
        first.lock().unwrap();

        let mut second = Flock::new(&path);
        let error = second.lock().unwrap_err();
        assert!(matches!(error, NodeError::Busy { .. }));

        first.unlock();
        second.lock().unwrap();
        second.unlock();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn drop_releases_the_lock() {
        let path = lock_path("drop");
        {
            let mut held = Flock::new(&path);
            held.lock().unwrap();
        }
        let mut next = Flock::new(&path);
        next.lock().unwrap();
        next.unlock();
        let _ = std::fs::remove_file(&path);
    }
}
