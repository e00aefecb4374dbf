//! CLI module for callstream - command-line interface and subcommands.
//!
//! Provides the `replay` and `print` subcommands over recorded stream logs.

pub mod commands;
pub mod replay;

pub use commands::Cli;
