//! Bounded advisory file locks.
//!
//! `fs2` only offers a blocking lock or a single non-blocking attempt, so the
//! wait is a retry loop over `try_lock_exclusive` that gives up after the
//! configured timeout with [`CoreError::LockContention`].

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use fs2::FileExt;

use snre_core::{CoreError, SessionId};

use crate::error::StoreResult;

const LOCK_RETRY: Duration = Duration::from_millis(10);

/// Exclusive lock on an open file, released on drop.
#[derive(Debug)]
pub(crate) struct FileLock {
    file: File,
}

impl FileLock {
    /// Open (creating if needed) `path` and lock it.
    pub(crate) fn acquire(path: &Path, session_id: SessionId, timeout: Duration) -> StoreResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        Self::wait(file, session_id, timeout)
    }

    /// Lock an already open `file`, waiting at most `timeout`.
    pub(crate) fn wait(file: File, session_id: SessionId, timeout: Duration) -> StoreResult<Self> {
        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { file }),
                Err(e) if is_contended(&e) => {
                    if started.elapsed() >= timeout {
                        return Err(CoreError::LockContention {
                            session_id,
                            waited_ms: started.elapsed().as_millis() as u64,
                        }
                        .into());
                    }
                    std::thread::sleep(LOCK_RETRY);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub(crate) fn file(&self) -> &File {
        &self.file
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
