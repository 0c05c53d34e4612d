//! Collaborators plugged into the engine
//!
//! A [`ScriptHost`] executes a resolved script file; a [`Compiler`] turns a
//! template source into a script before it runs. The engine hands every
//! execution a [`Scope`], which is the only way a script reaches the bindings,
//! the escape chain, the search paths and the output sink.

use crate::bindings::Bindings;
use crate::engine::Savant;
use crate::error::{Error, Outcome, Result};
use crate::escape::Escaper;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Nested fetches deeper than this fail the calling script
pub const MAX_FETCH_DEPTH: usize = 32;

/// Executes a resolved script with the engine scope visible to it
pub trait ScriptHost: Send {
    fn execute(&self, script: &Path, scope: &Scope<'_>) -> Result<()>;

    /// Drop any cached state
    fn reset(&self) {}
}

/// Turns a template source file into an executable script
///
/// Returning an empty path or an error value marks the compile as failed.
pub trait Compiler: Send + Sync {
    fn compile(&self, source: &Path) -> Outcome<PathBuf>;
}

impl<F> Compiler for F
where
    F: Fn(&Path) -> Outcome<PathBuf> + Send + Sync,
{
    fn compile(&self, source: &Path) -> Outcome<PathBuf> {
        self(source)
    }
}

/// What a running script can see and do
pub struct Scope<'a> {
    engine: &'a Savant,
    template: &'a str,
    script: &'a Path,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(engine: &'a Savant, template: &'a str, script: &'a Path) -> Self {
        Self {
            engine,
            template,
            script,
        }
    }

    /// Logical name the script was resolved from
    pub fn template(&self) -> &str {
        self.template
    }

    pub fn script(&self) -> &Path {
        self.script
    }

    /// Write text unescaped
    pub fn write(&self, text: &str) -> Result<()> {
        self.engine.write_raw(text)
    }

    /// Write a value through the configured escape chain
    pub fn print_escaped(&self, value: &str) -> Result<()> {
        self.engine.eprint(value)
    }

    /// Write a value through `stages` instead of the configured chain
    pub fn print_escaped_with(&self, value: &str, stages: &[Escaper]) -> Result<()> {
        self.engine.eprint_with(value, stages)
    }

    pub fn escape(&self, value: &str) -> String {
        self.engine.escape(value)
    }

    pub fn escape_with(&self, value: &str, stages: &[Escaper]) -> String {
        self.engine.escape_with(value, stages)
    }

    /// Every bound variable, as seen through `this`
    pub fn this(&self) -> &Bindings {
        self.engine.bindings()
    }

    pub fn extract(&self) -> bool {
        self.engine.extract()
    }

    /// A bound variable visible as a bare local name
    ///
    /// Only available when the engine flattens bindings into scope.
    pub fn local(&self, name: &str) -> Option<&Value> {
        if self.engine.extract() {
            self.engine.bindings().get(name)
        } else {
            None
        }
    }

    pub fn find_template(&self, name: &str) -> Option<PathBuf> {
        self.engine.find_template(name)
    }

    pub fn find_resource(&self, name: &str) -> Option<PathBuf> {
        self.engine.find_resource(name)
    }

    /// Render another template into a string
    pub fn fetch(&self, name: &str) -> Result<Outcome<String>> {
        if self.engine.depth() >= MAX_FETCH_DEPTH {
            return Err(Error::script(
                self.script,
                format!("fetch of '{}' exceeds {} nested renders", name, MAX_FETCH_DEPTH),
            ));
        }
        self.engine.render(Some(name))
    }
}

impl std::fmt::Debug for Scope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("template", &self.template)
            .field("script", &self.script)
            .finish()
    }
}
