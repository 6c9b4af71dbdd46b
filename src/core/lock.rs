//! Cross-process deploy lock.
//!
//! One lock file per stack identity, named by a hash of the identity. The
//! file itself is never deleted; ownership is the OS-level exclusive lock on
//! it, so a crashed run releases automatically when its process exits.

use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Exclusive ownership of one stack identity. Released on drop.
#[derive(Debug)]
pub struct DeployLock {
    identity: String,
    path: PathBuf,
    file: Option<File>,
}

impl DeployLock {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Unlock and close the lock file. Releasing twice is a no-op.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(err) = unlock(&file) {
                log_status!("lock", "Failed to unlock {}: {}", self.path.display(), err);
            }
        }
    }
}

impl Drop for DeployLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Lock file path for an identity: first 32 hex chars of its SHA-256.
pub fn lock_path(lock_dir: &Path, identity: &str) -> PathBuf {
    let digest = Sha256::digest(identity.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    lock_dir.join(format!("{}.lock", &hex[..32]))
}

/// Wait up to `timeout` for exclusive ownership of `identity`.
pub fn acquire(lock_dir: &Path, identity: &str, timeout: Duration) -> Result<DeployLock> {
    fs::create_dir_all(lock_dir).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("create {}", lock_dir.display())))
    })?;

    let path = lock_path(lock_dir, identity);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| Error::internal_io(e.to_string(), Some(format!("open {}", path.display()))))?;

    let started = Instant::now();
    let mut announced = false;
    loop {
        let acquired = try_acquire_exclusive(&file).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("lock {}", path.display())))
        })?;
        if acquired {
            return Ok(DeployLock {
                identity: identity.to_string(),
                path,
                file: Some(file),
            });
        }

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            return Err(Error::lock_timeout(identity, elapsed));
        }
        if !announced {
            log_status!("lock", "Waiting for another deploy of {}", identity);
            announced = true;
        }
        thread::sleep(POLL_INTERVAL.min(timeout - elapsed));
    }
}

#[cfg(unix)]
fn try_acquire_exclusive(file: &File) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(unix)]
fn unlock(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn try_acquire_exclusive(file: &File) -> io::Result<bool> {
    match file.try_lock() {
        Ok(()) => Ok(true),
        Err(fs::TryLockError::WouldBlock) => Ok(false),
        Err(fs::TryLockError::Error(err)) => Err(err),
    }
}

#[cfg(not(unix))]
fn unlock(file: &File) -> io::Result<()> {
    file.unlock()
}
