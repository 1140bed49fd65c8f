//! Cache coordination: the single-flight state machine guarding the
//! in-memory package index.
//!
//! The index reference lives in one of three states. Readers that arrive
//! while another caller is building park on a condvar and receive the
//! published result instead of starting their own rebuild; filesystem
//! writers flip `Ready` back to `Absent` so the next reader pays for the
//! rebuild.

use std::sync::{Arc, Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::error::Result;
use crate::index::PackageIndex;

#[derive(Debug)]
pub(crate) enum CacheState {
    /// No index; the next reader triggers a rebuild.
    Absent,
    /// A rebuild is in flight; readers wait for its result.
    Building,
    /// The current index.
    Ready(Arc<PackageIndex>),
}

/// What [`CacheCell::claim`] resolved to.
pub(crate) enum Claim {
    /// An index is available.
    Ready(Arc<PackageIndex>),
    /// The caller won the build slot and must publish or abandon.
    Build,
}

/// Shared coordination point for the cache state.
///
/// All transitions happen under one mutex; rebuild work itself runs
/// outside it so expensive I/O never serializes readers of a `Ready`
/// index behind the lock.
#[derive(Debug)]
pub(crate) struct CacheCell {
    state: Mutex<CacheState>,
    ready: Condvar,
    /// Set when an invalidation arrives while a build is in flight. The
    /// builder's snapshot predates the change, so its result is published
    /// to waiters but immediately marked absent again.
    dirty: AtomicBool,
}

impl CacheCell {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(CacheState::Absent),
            ready: Condvar::new(),
            dirty: AtomicBool::new(false),
        }
    }

    /// Returns the current index, or the build slot if there is none.
    ///
    /// At most one caller at a time holds the build slot; everyone else
    /// blocks here until that caller publishes or abandons.
    pub(crate) fn claim(&self) -> Result<Claim> {
        let mut state = self.state.lock()?;
        loop {
            match &*state {
                CacheState::Ready(index) => return Ok(Claim::Ready(index.clone())),
                CacheState::Absent => {
                    *state = CacheState::Building;
                    self.dirty.store(false, Ordering::Relaxed);
                    return Ok(Claim::Build);
                }
                CacheState::Building => state = self.ready.wait(state)?,
            }
        }
    }

    /// Publishes a freshly built index and wakes waiters.
    ///
    /// If an invalidation raced the build, the state lands on `Absent`
    /// instead so the stale snapshot is not served beyond the callers
    /// already waiting on it.
    pub(crate) fn publish(&self, index: Arc<PackageIndex>) -> Result<()> {
        let mut state = self.state.lock()?;
        if self.dirty.swap(false, Ordering::Relaxed) {
            debug!("index invalidated during rebuild; next reader rebuilds again");
            *state = CacheState::Absent;
        } else {
            *state = CacheState::Ready(index);
        }
        self.ready.notify_all();
        Ok(())
    }

    /// Gives the build slot back after a failed rebuild. One of the
    /// waiters (or the next caller) retries.
    pub(crate) fn abandon(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        *state = CacheState::Absent;
        self.ready.notify_all();
        Ok(())
    }

    /// Discards the current index. Never blocks on a rebuild; invalidating
    /// twice is the same as invalidating once.
    pub(crate) fn invalidate(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        match &*state {
            CacheState::Ready(_) => *state = CacheState::Absent,
            CacheState::Building => {
                self.dirty.store(true, Ordering::Relaxed);
            }
            CacheState::Absent => {}
        }
    }

    /// Runs a filesystem mutation under the coordination lock, then
    /// discards the current index. When `invalidate_on_error` is false a
    /// failed mutation leaves the cache untouched (a rejected push must
    /// not cost every reader a rebuild); partial failures of destructive
    /// mutations always invalidate so truth is re-derived from disk.
    pub(crate) fn mutate<T>(
        &self,
        invalidate_on_error: bool,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.lock()?;
        let result = f();
        if result.is_ok() || invalidate_on_error {
            match &*state {
                CacheState::Ready(_) => *state = CacheState::Absent,
                CacheState::Building => {
                    self.dirty.store(true, Ordering::Relaxed);
                }
                CacheState::Absent => {}
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_cold_cell_hands_out_build_slot_once() {
        let cell = CacheCell::new();
        assert!(matches!(cell.claim().unwrap(), Claim::Build));
        // A second claimant must not also get the slot; publish first.
        cell.publish(Arc::new(PackageIndex::default())).unwrap();
        assert!(matches!(cell.claim().unwrap(), Claim::Ready(_)));
    }

    #[test]
    fn test_invalidate_discards_ready_state() {
        let cell = CacheCell::new();
        assert!(matches!(cell.claim().unwrap(), Claim::Build));
        cell.publish(Arc::new(PackageIndex::default())).unwrap();
        cell.invalidate();
        cell.invalidate();
        assert!(matches!(cell.claim().unwrap(), Claim::Build));
        cell.abandon().unwrap();
    }

    #[test]
    fn test_waiters_receive_published_index() {
        let cell = Arc::new(CacheCell::new());
        assert!(matches!(cell.claim().unwrap(), Claim::Build));

        let served = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cell = cell.clone();
                let served = served.clone();
                std::thread::spawn(move || match cell.claim().unwrap() {
                    Claim::Ready(_) => {
                        served.fetch_add(1, Ordering::SeqCst);
                    }
                    Claim::Build => panic!("waiter stole the build slot"),
                })
            })
            .collect();

        // Give the waiters time to park on the condvar.
        std::thread::sleep(Duration::from_millis(50));
        cell.publish(Arc::new(PackageIndex::default())).unwrap();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(served.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_invalidation_during_build_marks_result_stale() {
        let cell = CacheCell::new();
        assert!(matches!(cell.claim().unwrap(), Claim::Build));
        cell.invalidate();
        cell.publish(Arc::new(PackageIndex::default())).unwrap();
        // The published snapshot predates the invalidation, so the next
        // claim must rebuild.
        assert!(matches!(cell.claim().unwrap(), Claim::Build));
        cell.abandon().unwrap();
    }

    #[test]
    fn test_mutate_skips_invalidation_on_error_when_asked() {
        let cell = CacheCell::new();
        assert!(matches!(cell.claim().unwrap(), Claim::Build));
        cell.publish(Arc::new(PackageIndex::default())).unwrap();

        let result: Result<()> = cell.mutate(false, || {
            Err(crate::error::CoreError::AlreadyExists {
                file_name: "x.dpk".to_string(),
            })
        });
        assert!(result.is_err());
        assert!(matches!(cell.claim().unwrap(), Claim::Ready(_)));

        let result: Result<()> = cell.mutate(true, || {
            Err(crate::error::CoreError::AlreadyExists {
                file_name: "x.dpk".to_string(),
            })
        });
        assert!(result.is_err());
        assert!(matches!(cell.claim().unwrap(), Claim::Build));
        cell.abandon().unwrap();
    }
}
