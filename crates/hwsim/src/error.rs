//! Error types for the simulators

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while running a simulator
#[derive(Debug, Error)]
pub enum SimError {
    /// Failed to open the serial port
    #[error("failed to open port {port}: {source}")]
    PortOpen {
        port: String,
        #[source]
        source: tokio_serial::Error,
    },

    /// Failed to read or parse a configuration file
    #[error("invalid configuration {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    /// I/O error on the serial stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
