//! Output escaping pipeline
//!
//! Every value printed through the engine runs through an [`EscapeChain`], an
//! ordered list of named unary transforms. Built-in transforms are looked up by
//! name once, when the chain is configured.

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Name of the transform in the default chain
pub const DEFAULT_ESCAPE: &str = "htmlspecialchars";

/// Same set as RFC 3986 unreserved characters
const URL_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[allow(clippy::expect_used)]
static TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!--.*?-->|</?[A-Za-z!][^>]*>").expect("valid tag pattern"));

/// Unary string transform
pub type Transform = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// A named escaping stage
#[derive(Clone)]
pub struct Escaper {
    name: String,
    func: Transform,
}

impl Escaper {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Look up a built-in transform, failing on unknown names
    pub fn builtin(name: &str) -> Result<Self> {
        builtin(name).ok_or_else(|| {
            Error::config(format!(
                "Unknown escape function '{}' (available: {})",
                name,
                BUILTINS.join(", ")
            ))
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, value: &str) -> String {
        (self.func)(value)
    }
}

impl fmt::Debug for Escaper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Escaper").field(&self.name).finish()
    }
}

/// Escapers compare by name
impl PartialEq for Escaper {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// Names accepted by [`builtin`], aliases included
pub const BUILTINS: &[&str] = &[
    "htmlspecialchars",
    "html",
    "attr",
    "js",
    "url",
    "strip_tags",
    "nl2br",
    "trim",
    "upper",
    "lower",
    "raw",
    "identity",
];

/// Resolve a built-in transform by name
pub fn builtin(name: &str) -> Option<Escaper> {
    let escaper = match name {
        "htmlspecialchars" | "html" => Escaper::new(name, html_special_chars),
        "attr" => Escaper::new(name, escape_attribute),
        "js" => Escaper::new(name, escape_js),
        "url" => Escaper::new(name, |v: &str| utf8_percent_encode(v, URL_ENCODE).to_string()),
        "strip_tags" => Escaper::new(name, strip_tags),
        "nl2br" => Escaper::new(name, |v: &str| v.replace('\n', "<br />\n")),
        "trim" => Escaper::new(name, |v: &str| v.trim().to_string()),
        "upper" => Escaper::new(name, str::to_uppercase),
        "lower" => Escaper::new(name, str::to_lowercase),
        "raw" | "identity" => Escaper::new(name, str::to_string),
        _ => return None,
    };
    Some(escaper)
}

/// Escape the five HTML special characters
pub fn html_special_chars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Escape for use inside an HTML attribute
pub fn escape_attribute(input: &str) -> String {
    html_special_chars(input)
        .replace('=', "&#x3D;")
        .replace('`', "&#x60;")
}

/// Escape for a JavaScript string literal
pub fn escape_js(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\'', "\\'")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
        .replace('<', "\\u003C")
        .replace('>', "\\u003E")
}

/// Remove markup tags and comments
pub fn strip_tags(input: &str) -> String {
    TAG_PATTERN.replace_all(input, "").into_owned()
}

/// Ordered list of escaping stages
#[derive(Debug, Clone)]
pub struct EscapeChain {
    stages: Vec<Escaper>,
}

impl Default for EscapeChain {
    fn default() -> Self {
        Self {
            stages: builtin(DEFAULT_ESCAPE).into_iter().collect(),
        }
    }
}

impl EscapeChain {
    pub fn new(stages: Vec<Escaper>) -> Self {
        Self { stages }
    }

    /// Build a chain from built-in names
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let stages = names
            .iter()
            .map(|name| Escaper::builtin(name.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { stages })
    }

    /// Replace every stage
    pub fn set(&mut self, stages: impl IntoIterator<Item = Escaper>) {
        self.stages = stages.into_iter().collect();
    }

    pub fn append(&mut self, stages: impl IntoIterator<Item = Escaper>) {
        self.stages.extend(stages);
    }

    /// Fold a value through the configured stages
    pub fn apply(&self, value: &str) -> String {
        Self::fold(&self.stages, value)
    }

    /// Fold a value through `stages` instead of the configured ones
    pub fn apply_with(&self, value: &str, stages: &[Escaper]) -> String {
        Self::fold(stages, value)
    }

    fn fold(stages: &[Escaper], value: &str) -> String {
        stages
            .iter()
            .fold(value.to_string(), |current, stage| stage.apply(&current))
    }

    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(Escaper::name).collect()
    }

    pub fn stages(&self) -> &[Escaper] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
