//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - replay: dispatch a recorded stream log to printing handlers
//! - print: render a recorded stream log as text

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use callstream::Format;

/// Callstream - dispatch streamed function calls while they arrive
#[derive(Parser, Debug)]
#[command(name = "callstream")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Argument serialization accepted on the command line
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatArg {
    Json,
    Yaml,
}

impl From<FormatArg> for Format {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Json => Format::Json,
            FormatArg::Yaml => Format::Yaml,
        }
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay a recorded stream log through printing handlers
    Replay {
        /// Log file: a JSON array of chunks or SSE `data:` lines
        log: PathBuf,

        /// Serialization of the call arguments (overrides config)
        #[arg(short, long, value_enum)]
        format: Option<FormatArg>,

        /// Target receiving plain content text (overrides config)
        #[arg(long)]
        content_target: Option<String>,

        /// Do not print the result record
        #[arg(long)]
        no_record: bool,
    },

    /// Render a recorded stream log as text
    Print {
        /// Log file: a JSON array of chunks or SSE `data:` lines
        log: PathBuf,
    },
}
