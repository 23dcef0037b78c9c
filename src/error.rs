//! Error types for the splitting k-mer index.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building or reading an index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// IO error during file reading/writing.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A sequence contained characters outside the accepted alphabet.
    #[error("Invalid sequence: {0}")]
    InvalidSequence(String),

    /// A configuration value was out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Structural FASTQ error; processing of the file stops at this record.
    #[error("Malformed FASTQ {path:?} at record {record}: {reason}")]
    MalformedFastq {
        path: PathBuf,
        record: u64,
        reason: String,
    },

    /// The memory budget cannot fit the minimum worker layout.
    #[error("Not enough memory: need {required} bytes, {available} available")]
    NotEnoughMemory { required: u64, available: u64 },

    /// A pipeline worker failed; the whole stage is aborted.
    #[error("Worker {worker} failed: {message}")]
    Worker { worker: String, message: String },

    /// The build was interrupted through the shutdown flag.
    #[error("Build cancelled")]
    Cancelled,

    /// The persisted store does not match the expected layout.
    #[error("Corrupt store: {0}")]
    CorruptStore(String),

    /// Error during serialization/deserialization of store attributes.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, IndexError>;
