// src/lock.rs

//! At most one scheduler per queue root.
//!
//! An exclusive, non-blocking `flock` is taken on `<queue_dir>/scheduler.lock`
//! and held for the life of the process. `<queue_dir>/scheduler.pid`
//! records `hostname pid` and is removed when the lock is dropped.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{info, warn};

use crate::errors::{ClusterqError, Result};

pub const LOCK_FILE: &str = "scheduler.lock";
pub const PID_FILE: &str = "scheduler.pid";

#[derive(Debug)]
pub struct SingletonLock {
    _file: File,
    pid_path: PathBuf,
}

impl SingletonLock {
    pub fn acquire(queue_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(queue_dir)?;
        let lock_path = queue_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("opening lock file {}", lock_path.display()))?;

        try_lock(&file).map_err(|_| {
            let holder = std::fs::read_to_string(queue_dir.join(PID_FILE)).unwrap_or_default();
            ClusterqError::LockHeld(format!(
                "{} is locked by another scheduler ({})",
                lock_path.display(),
                holder.trim()
            ))
        })?;

        let pid_path = queue_dir.join(PID_FILE);
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        std::fs::write(&pid_path, format!("{host} {}\n", std::process::id()))
            .with_context(|| format!("writing pid file {}", pid_path.display()))?;

        info!(lock = %lock_path.display(), "acquired scheduler lock");
        Ok(Self {
            _file: file,
            pid_path,
        })
    }
}

impl Drop for SingletonLock {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.pid_path) {
            warn!(path = %self.pid_path.display(), error = %err, "failed to remove pid file");
        }
    }
}

#[cfg(unix)]
fn try_lock(file: &File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn try_lock(_file: &File) -> std::io::Result<()> {
    Ok(())
}
