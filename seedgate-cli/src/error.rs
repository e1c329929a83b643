//! CLI error handling.
//!
//! Centralizes startup error formatting and exit codes for the binary.

use std::fmt;
use std::io;
use std::process;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// The HTTP listener failed to bind or serve
    Serve(io::Error),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::Serve(_) = self {
            eprintln!();
            eprintln!("Is another process already listening on the gateway port?");
            eprintln!("Pick a different one with --port.");
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Serve(e) => write!(f, "Gateway server error: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Serve(e) => Some(e),
            _ => None,
        }
    }
}
