//! Error types shared by the index, the matcher and the sequence store.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while writing or loading a persisted index.
///
/// Format errors are split so that callers can tell "rebuild needed"
/// (`VersionMismatch`, `ParamMismatch`) from "file damaged" (`Truncated`, `Corrupt`).
#[derive(Debug, Error)]
pub enum IndexError {
    /// Cannot open, map, read or write the file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The magic bytes are missing.
    #[error("{path}: not a kmerfold index")]
    NotAnIndex { path: PathBuf },

    /// The file was written by an incompatible build.
    #[error("index format version mismatch: expected {expected}, found {found}; rebuild the index")]
    VersionMismatch { expected: u32, found: u32 },

    /// The file is shorter or longer than its header announces.
    #[error("index file truncated or damaged: expected {expected} bytes, found {found}")]
    Truncated { expected: u64, found: u64 },

    /// A section holds values that cannot be right.
    #[error("index file corrupted: {0}")]
    Corrupt(String),

    /// The index was built with parameters that differ from the requested ones.
    #[error("index parameter mismatch: {0}")]
    ParamMismatch(String),
}

/// A letter that is not part of the alphabet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid letter '{}' at position {position}", char::from(*letter))]
pub struct InvalidLetter {
    pub position: usize,
    pub letter: u8,
}

/// Per-query failures; they never abort the rest of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("query {name}: {source}")]
    InvalidSymbol {
        name: String,
        #[source]
        source: InvalidLetter,
    },

    #[error("query {name}: cancelled")]
    Cancelled { name: String },
}

impl QueryError {
    pub fn name(&self) -> &str {
        match self {
            QueryError::InvalidSymbol { name, .. } => name,
            QueryError::Cancelled { name } => name,
        }
    }
}

/// An input record that was rejected while loading a sequence collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    /// Position of the record in its input, 0-based
    pub index: usize,
    pub name: String,
    pub reason: String,
}
