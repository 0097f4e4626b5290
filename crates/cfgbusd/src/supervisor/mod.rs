//! External command supervision.
//!
//! [`AsyncCommand`] and [`AsyncMultipleCommands`] run programs on worker
//! threads and expose their progress through a bounded, insertion-ordered
//! [`ProcessStore`] polled by id. [`CmdLine`] runs programs to completion for
//! handlers that need the result straight away. All three apply the same
//! root injection, death signal and environment to every child.

mod cmdline;
mod command;
mod errors;
mod multiple;
mod spawn;
mod store;

pub use self::cmdline::{CmdLine, CommandOutput};
pub use self::command::{AsyncCommand, CommandLaunch, LineHandler};
pub use self::errors::{CommandError, SupervisorError};
pub use self::multiple::{AsyncMultipleCommands, MultipleLaunch};
pub use self::spawn::inject_root;
pub use self::store::{ProcessRecord, ProcessSnapshot, ProcessStore};

const SUPERVISOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::supervisor");

type ExitHandler = Box<dyn FnOnce(&ProcessRecord) + Send>;
type ReconnectHook = Box<dyn FnOnce() + Send>;
