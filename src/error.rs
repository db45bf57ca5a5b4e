use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the core to the command layer.
#[derive(Error, Debug)]
pub enum ToolError {
    /// Non-retryable failure from the users endpoints.
    #[error("{0}")]
    Directory(String),

    /// Non-retryable failure from the tokens endpoints.
    #[error("{0}")]
    TokenRequest(String),

    #[error("Cannot --resume {prefix}. You must retry without --resume. ({reason})")]
    Resume { prefix: String, reason: String },

    #[error("Output file ({}) already exists. {reason}", path.display())]
    FileConflict { path: PathBuf, reason: String },

    #[error("Cannot access file {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File ({}) is not valid json ({source})", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cannot process csv file {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{operation} still failing after {attempts} attempts. Last response:\n{last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: String,
    },

    #[error("Email address ({0}) must be of form: user@altostrat.com")]
    InvalidEmail(String),

    /// A local data file another command produces is missing.
    #[error("{0}")]
    MissingData(String),

    #[error("Authorization error: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ToolError {
    pub fn resume(prefix: &str, reason: impl Into<String>) -> Self {
        ToolError::Resume {
            prefix: prefix.to_string(),
            reason: reason.into(),
        }
    }

    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ToolError::File {
            path: path.into(),
            source,
        }
    }
}

pub type ToolResult<T> = Result<T, ToolError>;
