//! Built-in modules.

pub mod diagnostics;
pub mod dns;
pub mod echo;

use crate::router::ModuleFactory;

/// Every module compiled into the daemon, in registration order.
pub const BUILTIN: &[ModuleFactory] = &[echo::factory, dns::factory, diagnostics::factory];
