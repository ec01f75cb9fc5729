//! Named global locks guarding multi-step task state transitions.
//!
//! A lock is acquired with a bounded wait and released when the returned
//! [`LockGuard`] is dropped, which also covers early returns and panics.

use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error};

/// Which critical section a lock guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockTitle {
    /// Task dispatch, start and end.
    TaskActivator,
    /// Patch submission.
    Patches,
}

impl LockTitle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskActivator => "task_activator",
            Self::Patches => "patches",
        }
    }
}

impl fmt::Display for LockTitle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock errors.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Timed out after {timeout:?} acquiring global lock '{title}'")]
    Timeout { title: LockTitle, timeout: Duration },
}

/// A single named mutual-exclusion resource.
pub struct GlobalLock {
    title: LockTitle,
    mutex: Arc<Mutex<()>>,
    holder: Arc<StdMutex<Option<String>>>,
}

impl GlobalLock {
    pub fn new(title: LockTitle) -> Self {
        Self {
            title,
            mutex: Arc::new(Mutex::new(())),
            holder: Arc::new(StdMutex::new(None)),
        }
    }

    pub fn title(&self) -> LockTitle {
        self.title
    }

    /// Wait up to `timeout` for the lock on behalf of `client`.
    pub async fn acquire(&self, client: &str, timeout: Duration) -> Result<LockGuard, LockError> {
        debug!(lock = %self.title, client = %client, "Attempting to acquire global lock");

        let guard = match tokio::time::timeout(timeout, self.mutex.clone().lock_owned()).await {
            Ok(guard) => guard,
            Err(_) => {
                error!(
                    lock = %self.title,
                    client = %client,
                    holder = ?self.holder(),
                    "Timed out attempting to acquire global lock"
                );
                return Err(LockError::Timeout {
                    title: self.title,
                    timeout,
                });
            }
        };

        match self.holder.lock() {
            Ok(mut holder) => *holder = Some(client.to_string()),
            Err(_) => error!(lock = %self.title, "Lock holder record is poisoned"),
        }

        debug!(lock = %self.title, client = %client, "Acquired global lock");
        Ok(LockGuard {
            title: self.title,
            client: client.to_string(),
            holder: self.holder.clone(),
            _guard: guard,
        })
    }

    /// Client currently holding the lock, if any.
    pub fn holder(&self) -> Option<String> {
        self.holder.lock().ok().and_then(|h| h.clone())
    }
}

/// Proof of holding a [`GlobalLock`]. Releases the lock on drop.
pub struct LockGuard {
    title: LockTitle,
    client: String,
    holder: Arc<StdMutex<Option<String>>>,
    // Dropped after `Drop::drop` runs, so the holder is cleared first.
    _guard: OwnedMutexGuard<()>,
}

impl LockGuard {
    /// Release explicitly. Equivalent to dropping the guard.
    pub fn release(self) {}
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match self.holder.lock() {
            Ok(mut holder) => {
                if holder.as_deref() != Some(self.client.as_str()) {
                    error!(
                        lock = %self.title,
                        client = %self.client,
                        recorded = ?*holder,
                        "Releasing global lock recorded under another client - this is really bad"
                    );
                }
                *holder = None;
                debug!(lock = %self.title, client = %self.client, "Released global lock");
            }
            Err(_) => {
                error!(
                    lock = %self.title,
                    client = %self.client,
                    "Error releasing global lock - this is really bad"
                );
            }
        }
    }
}

/// The fixed set of named locks.
pub struct GlobalLocks {
    task_activator: GlobalLock,
    patches: GlobalLock,
}

impl GlobalLocks {
    pub fn new() -> Self {
        Self {
            task_activator: GlobalLock::new(LockTitle::TaskActivator),
            patches: GlobalLock::new(LockTitle::Patches),
        }
    }

    pub fn get(&self, title: LockTitle) -> &GlobalLock {
        match title {
            LockTitle::TaskActivator => &self.task_activator,
            LockTitle::Patches => &self.patches,
        }
    }
}

impl Default for GlobalLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SHORT: Duration = Duration::from_millis(50);
    const LONG: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_second_caller_times_out() {
        let lock = GlobalLock::new(LockTitle::TaskActivator);

        let _held = lock.acquire("c1", LONG).await.unwrap();
        assert_eq!(lock.holder().as_deref(), Some("c1"));

        let result = lock.acquire("c2", SHORT).await;
        assert!(matches!(
            result,
            Err(LockError::Timeout {
                title: LockTitle::TaskActivator,
                ..
            })
        ));
        assert_eq!(lock.holder().as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_waiter_succeeds_after_release() {
        let lock = Arc::new(GlobalLock::new(LockTitle::TaskActivator));
        let held = lock.acquire("c1", LONG).await.unwrap();

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire("c2", LONG).await.map(|_| ()) })
        };

        tokio::time::sleep(SHORT).await;
        held.release();

        assert!(waiter.await.unwrap().is_ok());
        assert!(lock.holder().is_none());
    }

    #[tokio::test]
    async fn test_at_most_one_holder() {
        let lock = Arc::new(GlobalLock::new(LockTitle::TaskActivator));
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..8 {
            let lock = lock.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = lock.acquire(&format!("c{i}"), LONG).await.unwrap();
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_released_when_holder_panics() {
        let lock = Arc::new(GlobalLock::new(LockTitle::TaskActivator));

        let panicking = {
            let lock = lock.clone();
            tokio::spawn(async move {
                let _guard = lock.acquire("c1", LONG).await.unwrap();
                panic!("handler blew up");
            })
        };
        assert!(panicking.await.is_err());

        assert!(lock.acquire("c2", SHORT).await.is_ok());
    }

    #[tokio::test]
    async fn test_titles_do_not_contend() {
        let locks = GlobalLocks::new();
        let _activator = locks
            .get(LockTitle::TaskActivator)
            .acquire("c1", LONG)
            .await
            .unwrap();

        assert!(locks.get(LockTitle::Patches).acquire("c2", SHORT).await.is_ok());
        assert_eq!(locks.get(LockTitle::Patches).title(), LockTitle::Patches);
    }
}
