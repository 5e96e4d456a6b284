//! Command-line interface.

mod commands;

pub use commands::{is_debug, run};
