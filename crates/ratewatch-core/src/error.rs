//! Error taxonomy for the sampling engine.
//!
//! None of these are fatal. Source and parse errors degrade a single family
//! or row; [`SampleError`] is the only error a caller of
//! [`TelemetryFacade::sample`](crate::facade::TelemetryFacade::sample) sees.

use std::path::PathBuf;

use thiserror::Error;

/// A counter family could not be acquired from the OS.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{family}: cannot read {}: {source}", path.display())]
    Unavailable {
        family: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{program}: {reason}")]
    Command { program: String, reason: String },

    #[error("{family}: no usable rows")]
    Empty { family: &'static str },
}

/// One row or line did not have the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("expected at least {expected} fields, found {found}")]
    TooFewFields { expected: usize, found: usize },

    #[error("field {index} ({raw:?}) is not a number")]
    NotNumber { index: usize, raw: String },

    #[error("missing separator {0:?}")]
    MissingSeparator(char),

    #[error("unexpected row prefix {0:?}")]
    UnexpectedPrefix(String),

    #[error("missing key {0:?}")]
    MissingKey(&'static str),
}

/// GPU probe or query failure.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("{probe} probe unavailable: {reason}")]
    Probe { probe: &'static str, reason: String },

    #[error("query for GPU {index} failed: {reason}")]
    Query { index: u32, reason: String },

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// A whole pass could not run.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("sampling pass aborted before any family was read: {reason}")]
    PassAborted {
        reason: String,
        #[source]
        source: Option<SourceError>,
    },
}

/// Engine configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
