//! Command-line interface for the `pz` binary.
//!
//! Provides commands for catalog listings, product inspection and
//! download, uploads, and the two server-side processes.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli};
