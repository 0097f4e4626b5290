//! Mutex and condition-variable backings for [`super::RwLock`].

use std::io;
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

/// Errors raised while preparing a process-shared lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// The anonymous shared mapping could not be created.
    #[error("failed to map shared lock state: {source}")]
    Map {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// A pthread attribute or primitive failed to initialise.
    #[error("failed to initialise process-shared {primitive}: errno {code}")]
    Pthread {
        /// Primitive being initialised.
        primitive: &'static str,
        /// Error number returned by pthread.
        code: i32,
    },
}

/// Operations the reader/writer protocol is built from.
///
/// `writer` excludes writers from each other, `gate` holds back new readers
/// while a writer is acquiring, and the reader counter lets a writer wait for
/// admitted readers to drain.
pub(crate) trait LockPrimitives: Send + Sync {
    fn acquire_writer(&self);
    fn release_writer(&self);
    fn acquire_gate(&self);
    fn release_gate(&self);
    fn add_reader(&self);
    fn remove_reader(&self);
    fn wait_for_no_readers(&self);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Binary semaphore that may be released by whichever caller acquired it.
#[derive(Debug, Default)]
struct Semaphore {
    held: Mutex<bool>,
    released: Condvar,
}

impl Semaphore {
    fn acquire(&self) {
        let mut held = lock(&self.held);
        while *held {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *held = true;
    }

    fn release(&self) {
        *lock(&self.held) = false;
        self.released.notify_one();
    }
}

/// Thread-only backing used when every handler shares one process.
#[derive(Debug, Default)]
pub(crate) struct ThreadPrimitives {
    writer: Semaphore,
    gate: Semaphore,
    readers: Mutex<usize>,
    drained: Condvar,
}

impl LockPrimitives for ThreadPrimitives {
    fn acquire_writer(&self) {
        self.writer.acquire();
    }

    fn release_writer(&self) {
        self.writer.release();
    }

    fn acquire_gate(&self) {
        self.gate.acquire();
    }

    fn release_gate(&self) {
        self.gate.release();
    }

    fn add_reader(&self) {
        *lock(&self.readers) += 1;
    }

    fn remove_reader(&self) {
        let mut readers = lock(&self.readers);
        *readers = readers.saturating_sub(1);
        if *readers == 0 {
            self.drained.notify_all();
        }
    }

    fn wait_for_no_readers(&self) {
        let mut readers = lock(&self.readers);
        while *readers > 0 {
            readers = self
                .drained
                .wait(readers)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[repr(C)]
struct SharedState {
    writer: libc::pthread_mutex_t,
    gate: libc::pthread_mutex_t,
    counter: libc::pthread_mutex_t,
    drained: libc::pthread_cond_t,
    readers: usize,
}

/// Process-shared backing living in an anonymous `MAP_SHARED` mapping.
///
/// The mapping must be created before the workers are forked so every child
/// inherits the same physical pages.
pub(crate) struct SharedPrimitives {
    state: NonNull<SharedState>,
}

// SAFETY: the pointee is only touched through process-shared pthread
// primitives, which are safe to use from any thread.
unsafe impl Send for SharedPrimitives {}
// SAFETY: see `Send`.
unsafe impl Sync for SharedPrimitives {}

impl SharedPrimitives {
    pub(crate) fn new() -> Result<Self, LockError> {
        let size = std::mem::size_of::<SharedState>();
        // SAFETY: anonymous mapping with no file descriptor; the result is
        // checked against MAP_FAILED before use.
        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(LockError::Map {
                source: io::Error::last_os_error(),
            });
        }
        let Some(state) = NonNull::new(raw.cast::<SharedState>()) else {
            return Err(LockError::Map {
                source: io::Error::other("mmap returned a null mapping"),
            });
        };
        let primitives = Self { state };
        primitives.initialise()?;
        Ok(primitives)
    }

    fn initialise(&self) -> Result<(), LockError> {
        let state = self.state.as_ptr();
        // SAFETY: `state` points at a fresh, zeroed mapping large enough for
        // `SharedState`; nothing else references it yet.
        unsafe {
            let mut mutex_attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
            check("mutex attribute", libc::pthread_mutexattr_init(mutex_attr.as_mut_ptr()))?;
            check(
                "mutex attribute",
                libc::pthread_mutexattr_setpshared(
                    mutex_attr.as_mut_ptr(),
                    libc::PTHREAD_PROCESS_SHARED,
                ),
            )?;
            for mutex in [
                ptr::addr_of_mut!((*state).writer),
                ptr::addr_of_mut!((*state).gate),
                ptr::addr_of_mut!((*state).counter),
            ] {
                check("mutex", libc::pthread_mutex_init(mutex, mutex_attr.as_ptr()))?;
            }
            libc::pthread_mutexattr_destroy(mutex_attr.as_mut_ptr());

            let mut cond_attr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
            check("condition attribute", libc::pthread_condattr_init(cond_attr.as_mut_ptr()))?;
            check(
                "condition attribute",
                libc::pthread_condattr_setpshared(
                    cond_attr.as_mut_ptr(),
                    libc::PTHREAD_PROCESS_SHARED,
                ),
            )?;
            check(
                "condition",
                libc::pthread_cond_init(ptr::addr_of_mut!((*state).drained), cond_attr.as_ptr()),
            )?;
            libc::pthread_condattr_destroy(cond_attr.as_mut_ptr());
            ptr::addr_of_mut!((*state).readers).write(0);
        }
        Ok(())
    }

    fn writer(&self) -> *mut libc::pthread_mutex_t {
        // SAFETY: field projection on the live mapping; no reference is made.
        unsafe { ptr::addr_of_mut!((*self.state.as_ptr()).writer) }
    }

    fn gate(&self) -> *mut libc::pthread_mutex_t {
        // SAFETY: field projection on the live mapping; no reference is made.
        unsafe { ptr::addr_of_mut!((*self.state.as_ptr()).gate) }
    }

    fn counter(&self) -> *mut libc::pthread_mutex_t {
        // SAFETY: field projection on the live mapping; no reference is made.
        unsafe { ptr::addr_of_mut!((*self.state.as_ptr()).counter) }
    }

    fn with_counter<R>(&self, f: impl FnOnce(*mut SharedState) -> R) -> R {
        let counter = self.counter();
        // SAFETY: the counter mutex was initialised in `initialise` and lives
        // as long as the mapping.
        unsafe { libc::pthread_mutex_lock(counter) };
        let result = f(self.state.as_ptr());
        // SAFETY: locked above by this thread.
        unsafe { libc::pthread_mutex_unlock(counter) };
        result
    }
}

fn check(primitive: &'static str, code: i32) -> Result<(), LockError> {
    if code == 0 {
        Ok(())
    } else {
        Err(LockError::Pthread { primitive, code })
    }
}

impl LockPrimitives for SharedPrimitives {
    fn acquire_writer(&self) {
        // SAFETY: initialised mutex inside the live mapping.
        unsafe { libc::pthread_mutex_lock(self.writer()) };
    }

    fn release_writer(&self) {
        // SAFETY: held by this thread through the write guard.
        unsafe { libc::pthread_mutex_unlock(self.writer()) };
    }

    fn acquire_gate(&self) {
        // SAFETY: initialised mutex inside the live mapping.
        unsafe { libc::pthread_mutex_lock(self.gate()) };
    }

    fn release_gate(&self) {
        // SAFETY: held by this thread.
        unsafe { libc::pthread_mutex_unlock(self.gate()) };
    }

    fn add_reader(&self) {
        self.with_counter(|state| {
            // SAFETY: the counter mutex is held.
            unsafe { (*state).readers += 1 };
        });
    }

    fn remove_reader(&self) {
        self.with_counter(|state| {
            // SAFETY: the counter mutex is held.
            unsafe {
                (*state).readers = (*state).readers.saturating_sub(1);
                if (*state).readers == 0 {
                    libc::pthread_cond_broadcast(ptr::addr_of_mut!((*state).drained));
                }
            }
        });
    }

    fn wait_for_no_readers(&self) {
        let counter = self.counter();
        self.with_counter(|state| {
            // SAFETY: the counter mutex is held, as `pthread_cond_wait`
            // requires.
            unsafe {
                while (*state).readers > 0 {
                    libc::pthread_cond_wait(ptr::addr_of_mut!((*state).drained), counter);
                }
            }
        });
    }
}

impl Drop for SharedPrimitives {
    fn drop(&mut self) {
        // Only the local mapping goes away; other processes keep their own.
        // SAFETY: the mapping was created by `new` with this size.
        unsafe {
            libc::munmap(
                self.state.as_ptr().cast::<libc::c_void>(),
                std::mem::size_of::<SharedState>(),
            );
        }
    }
}
