//! CMS administration CLI library
//!
//! Database maintenance and reporting commands that run directly against the
//! repositories, plus the output formatting they share.

pub mod commands;
pub mod output;

pub use commands::CommandContext;
pub use output::{OutputFormat, PlainFormatter, TableFormatter};

/// Re-export common types
pub use anyhow::{Context, Result};
