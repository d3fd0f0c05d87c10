//! `chainfs` command-line tool.
//!
//! Provides commands for:
//! - Running the name service and storage nodes
//! - Storing, fetching and listing files
//!
//! The caller protocol itself lives in [`driver`] so it can be embedded.

pub mod commands;
pub mod config;
pub mod driver;

pub use config::{CliConfig, Command};
pub use driver::{split_blocks, FileClient};
