//! Daemon-level behavioural suites.

mod lifecycle_behaviour;
mod support;
