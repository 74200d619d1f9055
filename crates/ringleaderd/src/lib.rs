//! Daemon library for ringleader
//!
//! Exposes the CLI surface so both the binary and the tests can drive it.

pub mod cli;

pub use cli::{Cli, Command};
