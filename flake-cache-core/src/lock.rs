use crate::error::{CacheError, CacheResult};
use fd_lock::RwLock;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const MAX_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// An exclusive advisory lock (`flock`) on a file, acquired with a bounded wait.
///
/// The lock is held only for the duration of [`LockFile::with_lock`]. Since `flock`
/// locks belong to the open file description, the kernel releases them when the
/// holder exits, so a lock file left behind by a dead process is never treated as held.
#[derive(Debug, Clone)]
pub struct LockFile {
    path: PathBuf,
    timeout: Duration,
}

impl LockFile {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `f` while holding the lock.
    ///
    /// Fails with [`CacheError::LockTimeout`] if the lock cannot be acquired within
    /// the configured timeout.
    pub fn with_lock<T, F>(&self, f: F) -> CacheResult<T>
    where
        F: FnOnce() -> CacheResult<T>,
    {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        let mut lock = RwLock::new(file);

        let start = Instant::now();
        let mut interval = Duration::from_millis(2);
        let mut contended = false;

        loop {
            match lock.try_write() {
                Ok(_guard) => {
                    if contended {
                        debug!(
                            path = %self.path.display(),
                            waited = ?start.elapsed(),
                            "Acquired contended cache lock"
                        );
                    }
                    return f();
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let waited = start.elapsed();
                    if waited >= self.timeout {
                        return Err(CacheError::LockTimeout {
                            path: self.path.clone(),
                            waited,
                        });
                    }
                    if !contended {
                        trace!(path = %self.path.display(), "Waiting for cache lock");
                        contended = true;
                    }
                    std::thread::sleep(interval.min(self.timeout - waited));
                    interval = (interval * 2).min(MAX_POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier, mpsc};
    use tempfile::TempDir;

    #[test]
    fn test_lock_runs_closure() {
        let temp_dir = TempDir::new().unwrap();
        let lock = LockFile::new(temp_dir.path().join("sub/cache.lock"), Duration::from_secs(1));
        let value = lock.with_lock(|| Ok(42)).unwrap();
        assert_eq!(value, 42);
        assert!(lock.path().exists());

        // Released after use.
        assert_eq!(lock.with_lock(|| Ok("again")).unwrap(), "again");
    }

    #[test]
    fn test_lock_times_out_while_held() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cache.lock");
        let holder = LockFile::new(&path, Duration::from_secs(5));
        let waiter = LockFile::new(&path, Duration::from_millis(150));

        let (acquired_tx, acquired_rx) = mpsc::channel();
        let release = Arc::new(Barrier::new(2));
        let release_holder = release.clone();

        let handle = std::thread::spawn(move || {
            holder
                .with_lock(|| {
                    acquired_tx.send(()).unwrap();
                    release_holder.wait();
                    Ok(())
                })
                .unwrap();
        });

        acquired_rx.recv().unwrap();
        let result = waiter.with_lock(|| Ok(()));
        assert!(matches!(
            result,
            Err(CacheError::LockTimeout { waited, .. }) if waited >= Duration::from_millis(150)
        ));

        release.wait();
        handle.join().unwrap();

        // Once released, the waiter gets the lock.
        waiter.with_lock(|| Ok(())).unwrap();
    }

    #[test]
    fn test_lock_serialises_writers() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("counter.lock");
        let counter_path = temp_dir.path().join("counter");
        std::fs::write(&counter_path, "0").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = LockFile::new(&lock_path, Duration::from_secs(10));
                let counter_path = counter_path.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        lock.with_lock(|| {
                            let n: u32 = std::fs::read_to_string(&counter_path)?.parse().unwrap();
                            std::thread::yield_now();
                            std::fs::write(&counter_path, (n + 1).to_string())?;
                            Ok(())
                        })
                        .unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(std::fs::read_to_string(&counter_path).unwrap(), "80");
    }
}
