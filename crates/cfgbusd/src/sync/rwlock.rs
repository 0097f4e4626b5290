use std::marker::PhantomData;
use std::sync::Arc;

use cfgbus_config::LockBackend;
use tracing::debug;

use super::LOCK_TARGET;
use super::primitives::{LockError, LockPrimitives, SharedPrimitives, ThreadPrimitives};

/// Writer-preferring reader/writer lock.
///
/// Once a writer starts acquiring, new readers wait until it releases while
/// readers already admitted finish normally. The lock carries no data; it
/// serialises access to whatever backend the handlers agree it protects.
#[derive(Clone)]
pub struct RwLock {
    primitives: Arc<dyn LockPrimitives>,
    backend: LockBackend,
}

impl std::fmt::Debug for RwLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RwLock")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

impl RwLock {
    /// Builds a lock on the requested backing.
    ///
    /// A [`LockBackend::Process`] lock maps its state into shared memory and
    /// must be created before worker processes are forked.
    pub fn new(backend: LockBackend) -> Result<Self, LockError> {
        let primitives: Arc<dyn LockPrimitives> = match backend {
            LockBackend::Thread => Arc::new(ThreadPrimitives::default()),
            LockBackend::Process => Arc::new(SharedPrimitives::new()?),
        };
        Ok(Self {
            primitives,
            backend,
        })
    }

    /// Backing selected at construction.
    #[must_use]
    pub const fn backend(&self) -> LockBackend {
        self.backend
    }

    /// Acquires a shared read guard.
    #[must_use = "the lock is released as soon as the guard is dropped"]
    pub fn read(&self) -> ReadGuard<'_> {
        self.primitives.acquire_gate();
        self.primitives.add_reader();
        self.primitives.release_gate();
        ReadGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Acquires the exclusive write guard.
    #[must_use = "the lock is released as soon as the guard is dropped"]
    pub fn write(&self) -> WriteGuard<'_> {
        self.primitives.acquire_writer();
        self.primitives.acquire_gate();
        self.primitives.wait_for_no_readers();
        WriteGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Runs `f` under a read guard.
    pub fn with_read<R>(&self, name: &str, f: impl FnOnce() -> R) -> R {
        debug!(target: LOCK_TARGET, operation = name, "acquiring read lock");
        let _guard = self.read();
        debug!(target: LOCK_TARGET, operation = name, "read lock acquired");
        f()
    }

    /// Runs `f` under the write guard.
    pub fn with_write<R>(&self, name: &str, f: impl FnOnce() -> R) -> R {
        debug!(target: LOCK_TARGET, operation = name, "acquiring write lock");
        let _guard = self.write();
        debug!(target: LOCK_TARGET, operation = name, "write lock acquired");
        f()
    }
}

/// Shared access held until drop.
pub struct ReadGuard<'a> {
    lock: &'a RwLock,
    // pthread mutexes must be released by the acquiring thread.
    _not_send: PhantomData<*const ()>,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.primitives.remove_reader();
    }
}

/// Exclusive access held until drop.
pub struct WriteGuard<'a> {
    lock: &'a RwLock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.primitives.release_gate();
        self.lock.primitives.release_writer();
    }
}
