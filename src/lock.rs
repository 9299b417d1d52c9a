//! The advisory lock that serializes updater runs against the same
//! project: only one `updater` process may build a given tree at a time.

use anyhow::{Context, Result};
use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// Holds an exclusive `flock` on the update lock file for as long as it is
/// alive; the lock is released (`LOCK_UN`) when this is dropped, so an
/// early `?` return anywhere in the updater can never leak it.
pub struct UpdateLock {
    file: File,
}

impl UpdateLock {
    /// Opens `path` and blocks until an exclusive lock is acquired. Prints
    /// a waiting notice if the lock isn't immediately available, matching
    /// the original's non-blocking-then-blocking retry.
    pub fn acquire(path: &Path) -> Result<UpdateLock> {
        let file = File::open(path).with_context(|| format!("{}", path.display()))?;
        let fd = file.as_raw_fd();

        // Safety: `fd` comes from a `File` we keep alive for the call's
        // duration; `flock` operates only on that descriptor.
        let rc = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                println!("Waiting for lock...");
                let rc = unsafe { libc::flock(fd, libc::LOCK_EX) };
                if rc < 0 {
                    return Err(std::io::Error::last_os_error()).context("flock");
                }
            } else {
                return Err(err).context("flock");
            }
        }

        Ok(UpdateLock { file })
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        let fd = self.file.as_raw_fd();
        // Safety: same descriptor we locked; errors on unlock aren't
        // actionable from a destructor.
        unsafe {
            libc::flock(fd, libc::LOCK_UN);
        }
    }
}
