use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScoutError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("{0}")]
    ParseError(String),
    #[error("Tool '{0}' not found")]
    UnknownTool(String),
    #[error("{0}")]
    ValidationRejected(String),
    #[error("{0}")]
    ToolExecution(String),
    #[error("Model error: {0}")]
    ModelError(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl ScoutError {
    /// Short class name used in `ERROR: <kind>: <message>` observations.
    pub fn kind(&self) -> &'static str {
        match self {
            ScoutError::RusqliteError(_) => "SqliteError",
            ScoutError::IoError(_) => "IoError",
            ScoutError::JsonError(_) => "JsonError",
            ScoutError::ConfigError(_) => "ConfigError",
            ScoutError::ParseError(_) => "ParseError",
            ScoutError::UnknownTool(_) => "UnknownToolError",
            ScoutError::ValidationRejected(_) => "ValidationRejected",
            ScoutError::ToolExecution(_) => "ToolExecutionError",
            ScoutError::ModelError(_) => "ModelError",
            ScoutError::NotFound(_) => "NotFound",
        }
    }

    /// Render as an observation the model can read and correct against.
    pub fn to_observation(&self) -> String {
        format!("ERROR: {}: {}", self.kind(), self)
    }
}
