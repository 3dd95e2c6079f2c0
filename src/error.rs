//! Error types for the embedding trainer.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The persisted matrix does not describe the current activity index.
    #[error("inconsistency between embedding matrix and activity index: {0}")]
    Consistency(String),

    /// A log value has no entry in the supplied index.
    #[error("{kind} '{key}' is missing from the index")]
    Lookup { kind: &'static str, key: String },

    /// Input that cannot produce a meaningful training run.
    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Malformed field in an input or persisted file.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

pub type Result<T> = std::result::Result<T, Error>;
