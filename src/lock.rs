//! Single-writer run lock for ingestion.
//!
//! An advisory OS lock (`flock`/`LockFileEx`) on the lock file. The kernel
//! drops it when the holding process exits for any reason, so a killed run
//! never leaves the store locked. The file itself stays in place and only
//! records who last held it.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use fd_lock::{RwLock, RwLockWriteGuard};
use tracing::debug;

pub struct RunLock {
    path: PathBuf,
    file: RwLock<File>,
}

impl fmt::Debug for RunLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunLock").field("path", &self.path).finish()
    }
}

impl RunLock {
    /// Open (creating if needed) the lock file without locking it.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create store dir: {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
        })
    }

    /// Take the lock without waiting. Released when the guard drops.
    pub fn try_acquire(&mut self) -> Result<RwLockWriteGuard<'_, File>> {
        let mut guard = match self.file.try_write() {
            Ok(guard) => guard,
            Err(e) if e.kind() == ErrorKind::WouldBlock => bail!(
                "another ingestion run is in progress (lock {} is held)",
                self.path.display()
            ),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to lock {}", self.path.display()))
            }
        };

        guard.set_len(0)?;
        guard.seek(SeekFrom::Start(0))?;
        writeln!(
            *guard,
            "pid={} started={}",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        )?;
        debug!(lock = %self.path.display(), "acquired run lock");
        Ok(guard)
    }
}
