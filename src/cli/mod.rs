//! CLI module for the add-on provisioning tool.
//!
//! This module provides the command-line interface for provisioning and
//! tearing down add-ons.

mod commands;
mod output;

pub use commands::{list_filter, Cli, Commands, IdentityArgs, LogFormat, OutputFormat};
pub use output::OutputFormatter;
