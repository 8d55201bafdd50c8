//! Per-key build lock: an OS advisory lock (`fd-lock`) on `<key>.lock`.
//!
//! The lock file itself stays on disk; only the advisory lock matters, and
//! the OS drops it when the holder exits, crashed or not.
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fd_lock::RwLock;
use tracing::debug;

use evidence_core::{Error, Result};

pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct BuildLock {
    path: PathBuf,
    file: RwLock<File>,
}

impl BuildLock {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).truncate(false).write(true).open(path)?;
        Ok(Self { path: path.to_path_buf(), file: RwLock::new(file) })
    }

    pub fn path(&self) -> &Path { &self.path }

    /// Run `f` while holding the lock exclusively, polling for up to `wait`
    /// while another holder has it.
    pub fn run_exclusive<R>(&mut self, wait: Duration, f: impl FnOnce() -> R) -> Result<R> {
        let started = Instant::now();
        loop {
            match self.file.try_write() {
                Ok(_guard) => {
                    debug!(lock = %self.path.display(), "build lock acquired");
                    return Ok(f());
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if started.elapsed() >= wait {
                        return Err(Error::BuildInProgress(self.path.display().to_string()));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
