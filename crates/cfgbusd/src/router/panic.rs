//! Converts handler panics into error replies.
//!
//! A process-wide hook is installed once. While a thread is inside
//! [`catch`], the hook records the panic message and a captured backtrace
//! for that thread instead of printing them; panics anywhere else reach the
//! previously installed hook unchanged.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe, PanicHookInfo};
use std::sync::Once;

static INSTALL: Once = Once::new();

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static LAST_PANIC: RefCell<Option<PanicReport>> = const { RefCell::new(None) };
}

/// Message and backtrace of a caught panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PanicReport {
    pub(crate) message: String,
    pub(crate) trace: String,
}

/// Runs `f`, turning a panic into a [`PanicReport`].
pub(crate) fn catch<R>(f: impl FnOnce() -> R) -> Result<R, PanicReport> {
    install_hook();
    let previous = CAPTURING.with(|flag| flag.replace(true));
    let outcome = panic::catch_unwind(AssertUnwindSafe(f));
    CAPTURING.with(|flag| flag.set(previous));
    outcome.map_err(|payload| {
        LAST_PANIC
            .with(|slot| slot.borrow_mut().take())
            .unwrap_or_else(|| PanicReport {
                message: payload_message(payload.as_ref()),
                trace: String::new(),
            })
    })
}

fn install_hook() {
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
            if CAPTURING.with(Cell::get) {
                let report = PanicReport {
                    message: payload_message(info.payload()),
                    trace: format!("{info}\n{}", Backtrace::force_capture()),
                };
                LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(report));
            } else {
                previous(info);
            }
        }));
    });
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_owned())
}
