//! Structured failure values
//!
//! A render that fails under the default (no-throw) policy hands back an
//! [`ErrorValue`] instead of output. The value is immutable once built and can be
//! inspected, logged, or serialized by the caller.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Result of an operation that fails softly with an [`ErrorValue`]
pub type Outcome<T> = std::result::Result<T, ErrorValue>;

/// Error codes produced by the engine
///
/// `Custom` covers codes defined by compilers and script hosts, so a single
/// closed type stands in for every kind of error value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The logical name did not resolve to a readable file inside a registered root
    Template,
    /// The compiler collaborator failed or returned an empty result
    Compiler,
    /// The script failed while executing
    Script,
    Custom(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::Template => "ERR_TEMPLATE",
            ErrorCode::Compiler => "ERR_COMPILER",
            ErrorCode::Script => "ERR_SCRIPT",
            ErrorCode::Custom(code) => code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        match code {
            "ERR_TEMPLATE" => ErrorCode::Template,
            "ERR_COMPILER" => ErrorCode::Compiler,
            "ERR_SCRIPT" => ErrorCode::Script,
            other => ErrorCode::Custom(other.to_string()),
        }
    }
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        ErrorCode::from(code.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(ErrorCode::from(code))
    }
}

/// Severity attached to an error value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Notice,
    Warning,
    #[default]
    Error,
}

impl Severity {
    pub fn log_level(&self) -> log::Level {
        match self {
            Severity::Notice => log::Level::Info,
            Severity::Warning => log::Level::Warn,
            Severity::Error => log::Level::Error,
        }
    }
}

/// Structured failure descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorValue {
    code: ErrorCode,
    info: Map<String, Value>,
    level: Severity,
    trace: bool,
}

impl ErrorValue {
    /// Create an error value with empty info, `Error` severity and tracing on
    pub fn new(code: impl Into<ErrorCode>) -> Self {
        Self::from_parts(code, Map::new(), Severity::default(), true)
    }

    pub fn from_parts(
        code: impl Into<ErrorCode>,
        info: Map<String, Value>,
        level: Severity,
        trace: bool,
    ) -> Self {
        Self {
            code: code.into(),
            info,
            level,
            trace,
        }
    }

    /// Add one info entry while the value is still being built
    pub fn with_info(mut self, key: impl Into<String>, value: Value) -> Self {
        self.info.insert(key.into(), value);
        self
    }

    pub fn code(&self) -> &ErrorCode {
        &self.code
    }

    pub fn info(&self) -> &Map<String, Value> {
        &self.info
    }

    /// Look up a single info entry
    pub fn info_value(&self, key: &str) -> Option<&Value> {
        self.info.get(key)
    }

    pub fn level(&self) -> Severity {
        self.level
    }

    pub fn trace(&self) -> bool {
        self.trace
    }

    /// Send the error to the log at its severity when tracing is on
    pub fn report(&self) {
        if self.trace {
            log::log!(self.level.log_level(), "{}", self);
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        if !self.info.is_empty() {
            let details: Vec<String> = self
                .info
                .iter()
                .map(|(key, value)| match value {
                    Value::String(s) => format!("{}: {}", key, s),
                    other => format!("{}: {}", key, other),
                })
                .collect();
            write!(f, " ({})", details.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorValue {}

/// Recognizes error values among arbitrary results
pub trait IsError {
    fn as_error_value(&self) -> Option<&ErrorValue>;

    fn is_error(&self) -> bool {
        self.as_error_value().is_some()
    }
}

impl IsError for ErrorValue {
    fn as_error_value(&self) -> Option<&ErrorValue> {
        Some(self)
    }
}

impl<T> IsError for Outcome<T> {
    fn as_error_value(&self) -> Option<&ErrorValue> {
        self.as_ref().err()
    }
}

impl IsError for Option<ErrorValue> {
    fn as_error_value(&self) -> Option<&ErrorValue> {
        self.as_ref()
    }
}

impl IsError for str {
    fn as_error_value(&self) -> Option<&ErrorValue> {
        None
    }
}

impl IsError for String {
    fn as_error_value(&self) -> Option<&ErrorValue> {
        None
    }
}

impl IsError for Value {
    fn as_error_value(&self) -> Option<&ErrorValue> {
        None
    }

    // A JSON value never borrows an ErrorValue, but a serialized one still counts
    fn is_error(&self) -> bool {
        matches!(self, Value::Object(_))
            && serde_json::from_value::<ErrorValue>(self.clone()).is_ok()
    }
}

/// True when `value` is an error value in any of its forms
pub fn is_error<V: IsError + ?Sized>(value: &V) -> bool {
    value.is_error()
}
