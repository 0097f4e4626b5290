//! Writer-preferring reader/writer lock shared by module handlers.
//!
//! The lock guards the configuration backend. Depending on the bus it is
//! backed either by thread primitives, when every handler runs inside one
//! process, or by process-shared pthread primitives placed in an anonymous
//! shared mapping, when the RPC-object bus forks one worker per module.

mod primitives;
mod rwlock;

pub use self::primitives::LockError;
pub use self::rwlock::{ReadGuard, RwLock, WriteGuard};

const LOCK_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lock");
