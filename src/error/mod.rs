use std::path::PathBuf;
use thiserror::Error;

pub mod value;

pub type Result<T> = std::result::Result<T, Error>;

pub use value::{is_error, ErrorCode, ErrorValue, IsError, Outcome, Severity};

/// Main error type for savant
#[derive(Error, Debug)]
pub enum Error {
    /// An error raised under the exceptions policy instead of being returned
    #[error("Savant error: {0}")]
    Raised(Box<ErrorValue>),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Script error in {}: {message}", script.display())]
    Script { script: PathBuf, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "config")]
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }

    pub fn script(script: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Script {
            script: script.into(),
            message: message.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn raised(value: ErrorValue) -> Self {
        Self::Raised(Box::new(value))
    }

    /// The error value carried by a raised error
    pub fn raised_value(&self) -> Option<&ErrorValue> {
        match self {
            Error::Raised(value) => Some(value),
            _ => None,
        }
    }

    /// Get the error code, `ERR_*` for raised errors and `E_*` for the rest
    pub fn error_code(&self) -> &str {
        match self {
            Error::Raised(value) => value.code().as_str(),
            Error::Template(_) => "E_TEMPLATE",
            Error::Script { .. } => "E_SCRIPT",
            Error::Config(_) => "E_CONFIG",
            Error::Io(_) => "E_IO",
            Error::Json(_) => "E_JSON",
            #[cfg(feature = "config")]
            Error::Toml(_) => "E_TOML",
        }
    }
}
