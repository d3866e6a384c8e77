//! Error types for batch runs.

use std::path::PathBuf;

use thiserror::Error;
use vblend_merge::BlendError;

/// Errors that can occur while reading a batch table or running one of its rows.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The table's file extension is not a known format.
    #[error("Unsupported table format: {0:?} (expected .csv, .tsv, .xlsx, .xlsm, .xls or .ods)")]
    UnsupportedFormat(PathBuf),

    /// The table could not be read or parsed.
    #[error("Failed to read table {path:?}: {reason}")]
    TableRead {
        /// Table path.
        path: PathBuf,
        /// Underlying cause.
        reason: String,
    },

    /// The table has no header row.
    #[error("Table {0:?} has no header row")]
    MissingHeader(PathBuf),

    /// A row could not be turned into a job.
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    /// No program was given for CLI mode.
    #[error("Base command is empty")]
    EmptyCommand,

    /// The program could not be started.
    #[error("Failed to run '{program}': {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying cause.
        #[source]
        source: std::io::Error,
    },

    /// The program ran but reported failure.
    #[error("Command '{command}' failed with {status}")]
    CommandFailed {
        /// Full command line.
        command: String,
        /// Exit status description.
        status: String,
    },

    /// A blend row failed.
    #[error(transparent)]
    Blend(#[from] BlendError),
}

/// Result type for batch operations.
pub type Result<T> = std::result::Result<T, BatchError>;
