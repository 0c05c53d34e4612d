use crate::engine::DEFAULT_ERROR_TEXT;
use crate::error::{Error, Result};
use crate::escape::EscapeChain;
use crate::paths::PathSpec;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Engine configuration, usually loaded from a `savant.toml`
///
/// ```toml
/// template_path = "views:shared/views"
/// resource_path = ["assets"]
/// template = "index.tpl"
/// escape = ["htmlspecialchars"]
/// exceptions = false
/// extract = true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SavantConfig {
    #[serde(default)]
    pub template_path: PathSpec,
    #[serde(default)]
    pub resource_path: PathSpec,
    #[serde(default = "default_error_text")]
    pub error_text: String,
    #[serde(default)]
    pub exceptions: bool,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub extract: bool,
    #[serde(default = "default_escape")]
    pub escape: Vec<String>,
    /// Keep parsed scripts between renders
    #[serde(default = "default_cache")]
    pub cache: bool,
}

fn default_error_text() -> String {
    DEFAULT_ERROR_TEXT.to_string()
}

fn default_escape() -> Vec<String> {
    vec!["htmlspecialchars".to_string()]
}

fn default_cache() -> bool {
    true
}

impl Default for SavantConfig {
    fn default() -> Self {
        Self {
            template_path: PathSpec::default(),
            resource_path: PathSpec::default(),
            error_text: default_error_text(),
            exceptions: false,
            template: None,
            extract: false,
            escape: default_escape(),
            cache: default_cache(),
        }
    }
}

impl SavantConfig {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let content = fs::read_to_string(path_ref).map_err(|e| {
            Error::config(format!(
                "Failed to read config file '{}': {}",
                path_ref.display(),
                e
            ))
        })?;

        let mut config: SavantConfig = toml::from_str(&content).map_err(|e| {
            Error::config(format!(
                "Failed to parse config file '{}': {}",
                path_ref.display(),
                e
            ))
        })?;
        config.apply_env_overrides()?;

        log::debug!("Loaded configuration from {}", path_ref.display());
        Ok(config)
    }

    /// Parse configuration from TOML text, without environment overrides
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `SAVANT_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dirs) = lookup("SAVANT_TEMPLATE_PATH") {
            self.template_path = PathSpec::Delimited(dirs);
        }
        if let Some(dirs) = lookup("SAVANT_RESOURCE_PATH") {
            self.resource_path = PathSpec::Delimited(dirs);
        }
        if let Some(template) = lookup("SAVANT_TEMPLATE") {
            self.template = Some(template).filter(|t| !t.is_empty());
        }
        if let Some(text) = lookup("SAVANT_ERROR_TEXT") {
            self.error_text = text;
        }
        if let Some(flag) = lookup("SAVANT_EXCEPTIONS") {
            self.exceptions = flag
                .parse()
                .map_err(|_| Error::config("Invalid SAVANT_EXCEPTIONS value"))?;
        }
        if let Some(flag) = lookup("SAVANT_EXTRACT") {
            self.extract = flag
                .parse()
                .map_err(|_| Error::config("Invalid SAVANT_EXTRACT value"))?;
        }
        Ok(())
    }

    /// Check the configuration before an engine is built from it
    pub fn validate(&self) -> Result<()> {
        EscapeChain::from_names(&self.escape)?;

        if matches!(&self.template, Some(name) if name.trim().is_empty()) {
            return Err(Error::config("Default template name cannot be blank"));
        }

        // Missing directories are skipped at resolve time
        if let PathSpec::List(dirs) = &self.template_path {
            for dir in dirs.iter().filter(|d| !Path::new(d).is_dir()) {
                log::warn!("Template directory does not exist: {}", dir);
            }
        }

        Ok(())
    }
}
