//! The rendering engine
//!
//! [`Savant`] ties the pieces together: a template name is resolved on the
//! template search path, optionally compiled, then executed by the script host
//! inside an output capture. Any failure becomes an [`ErrorValue`], or an
//! [`Error::Raised`] when the engine is configured to raise.
//!
//! An engine is single-threaded. It can be moved between threads but never
//! shared, and a script running inside it only gets shared access.

use crate::bindings::Bindings;
use crate::error::{Error, ErrorCode, ErrorValue, IsError, Outcome, Result, Severity};
use crate::escape::{EscapeChain, Escaper};
use crate::host::{Compiler, ScriptHost, Scope};
use crate::paths::{PathKind, PathRegistry, PathSpec};
use crate::script::ScriptEngine;
use crate::sink::{Capture, Sink};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[cfg(feature = "config")]
use crate::config::SavantConfig;

/// Text shown by [`Savant::get_output`] when a render fails
pub const DEFAULT_ERROR_TEXT: &str = "\n\ntemplate error, examine fetch() result\n\n";

/// Version of the engine API
pub fn api_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Where a render currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderState {
    #[default]
    Idle,
    ResolvingTemplate,
    Compiling,
    Executing,
    Done,
    Failed,
}

/// Render options that are not paths or escaping
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub error_text: String,
    pub exceptions: bool,
    pub template: Option<String>,
    pub extract: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            error_text: DEFAULT_ERROR_TEXT.to_string(),
            exceptions: false,
            template: None,
            extract: false,
        }
    }
}

/// Template rendering engine
pub struct Savant {
    options: Options,
    paths: PathRegistry,
    escape: EscapeChain,
    vars: Bindings,
    compiler: Option<Arc<dyn Compiler>>,
    host: Box<dyn ScriptHost>,
    sink: RefCell<Sink>,
    state: Cell<RenderState>,
    depth: Cell<usize>,
}

impl Default for Savant {
    fn default() -> Self {
        Self::new()
    }
}

impl Savant {
    /// Engine with default options, writing to stdout
    pub fn new() -> Self {
        Self {
            options: Options::default(),
            paths: PathRegistry::new(),
            escape: EscapeChain::default(),
            vars: Bindings::new(),
            compiler: None,
            host: Box::new(ScriptEngine::new()),
            sink: RefCell::new(Sink::stdout()),
            state: Cell::new(RenderState::Idle),
            depth: Cell::new(0),
        }
    }

    /// Engine configured from a [`SavantConfig`]
    #[cfg(feature = "config")]
    pub fn from_config(config: &SavantConfig) -> Result<Self> {
        config.validate()?;

        let mut engine = Self::new();
        engine.options = Options {
            error_text: config.error_text.clone(),
            exceptions: config.exceptions,
            template: config.template.clone(),
            extract: config.extract,
        };
        engine.set_path(PathKind::Template, config.template_path.clone());
        engine.set_path(PathKind::Resource, config.resource_path.clone());

        if config.escape.is_empty() {
            log::warn!("Empty escape list in configuration, keeping the default chain");
        } else {
            engine.escape = EscapeChain::from_names(&config.escape)?;
        }

        engine.host = Box::new(ScriptEngine::new().with_cache(config.cache));
        Ok(engine)
    }

    pub fn with_sink(mut self, target: impl Write + Send + 'static) -> Self {
        self.sink = RefCell::new(Sink::new(target));
        self
    }

    pub fn with_host(mut self, host: impl ScriptHost + 'static) -> Self {
        self.host = Box::new(host);
        self
    }

    pub fn with_compiler(mut self, compiler: impl Compiler + 'static) -> Self {
        self.compiler = Some(Arc::new(compiler));
        self
    }

    // ---- options ----

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn error_text(&self) -> &str {
        &self.options.error_text
    }

    pub fn set_error_text(&mut self, text: impl Into<String>) {
        self.options.error_text = text.into();
    }

    pub fn exceptions(&self) -> bool {
        self.options.exceptions
    }

    pub fn set_exceptions(&mut self, flag: bool) {
        self.options.exceptions = flag;
    }

    /// Default template name used when a render names none
    pub fn template(&self) -> Option<&str> {
        self.options.template.as_deref()
    }

    pub fn set_template(&mut self, name: Option<impl Into<String>>) {
        self.options.template = name.map(Into::into);
    }

    pub fn extract(&self) -> bool {
        self.options.extract
    }

    pub fn set_extract(&mut self, flag: bool) {
        self.options.extract = flag;
    }

    pub fn set_compiler(&mut self, compiler: Option<Arc<dyn Compiler>>) {
        self.compiler = compiler;
    }

    pub fn has_compiler(&self) -> bool {
        self.compiler.is_some()
    }

    pub fn set_host(&mut self, host: Box<dyn ScriptHost>) {
        self.host = host;
    }

    /// Forget anything the script host cached
    pub fn reset_host(&self) {
        self.host.reset();
    }

    pub fn state(&self) -> RenderState {
        self.state.get()
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth.get()
    }

    fn transition(&self, next: RenderState) {
        let prev = self.state.replace(next);
        log::trace!("Render state {:?} -> {:?}", prev, next);
    }

    // ---- search paths ----

    /// Replace the search path for `kind`, keeping its fallback directory
    pub fn set_path(&mut self, kind: PathKind, spec: impl Into<PathSpec>) {
        self.paths.set(kind, spec);
    }

    /// Push directories to the front of the search path for `kind`
    pub fn add_path(&mut self, kind: PathKind, spec: impl Into<PathSpec>) {
        self.paths.add(kind, spec);
    }

    pub fn paths(&self) -> &PathRegistry {
        &self.paths
    }

    pub fn find_file(&self, kind: PathKind, name: &str) -> Option<PathBuf> {
        self.paths.resolve(kind, name)
    }

    pub fn find_template(&self, name: &str) -> Option<PathBuf> {
        self.find_file(PathKind::Template, name)
    }

    pub fn find_resource(&self, name: &str) -> Option<PathBuf> {
        self.find_file(PathKind::Resource, name)
    }

    // ---- escaping ----

    pub fn escape_chain(&self) -> &EscapeChain {
        &self.escape
    }

    pub fn set_escape(&mut self, stages: impl IntoIterator<Item = Escaper>) {
        self.escape.set(stages);
    }

    pub fn add_escape(&mut self, stages: impl IntoIterator<Item = Escaper>) {
        self.escape.append(stages);
    }

    pub fn escape(&self, value: &str) -> String {
        self.escape.apply(value)
    }

    /// Escape with `stages` for this call only
    pub fn escape_with(&self, value: &str, stages: &[Escaper]) -> String {
        self.escape.apply_with(value, stages)
    }

    /// Print a value through the escape chain
    pub fn eprint(&self, value: &str) -> Result<()> {
        self.write_raw(&self.escape(value))
    }

    pub fn eprint_with(&self, value: &str, stages: &[Escaper]) -> Result<()> {
        self.write_raw(&self.escape_with(value, stages))
    }

    pub(crate) fn write_raw(&self, text: &str) -> Result<()> {
        self.sink.borrow_mut().write_str(text)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.sink.borrow_mut().flush()?;
        Ok(())
    }

    // ---- variables ----

    pub fn bindings(&self) -> &Bindings {
        &self.vars
    }

    pub fn bindings_mut(&mut self) -> &mut Bindings {
        &mut self.vars
    }

    /// Bind one variable, false when the name is reserved
    pub fn assign(&mut self, name: impl Into<String>, value: impl Into<Value>) -> bool {
        self.vars.assign(name, value)
    }

    pub fn assign_map<I, K, V>(&mut self, pairs: I) -> bool
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.vars.assign_map(pairs)
    }

    /// Bind the public fields of a serializable value
    pub fn assign_from<T: Serialize + ?Sized>(&mut self, source: &T) -> Result<bool> {
        self.vars.assign_from(source)
    }

    // ---- errors ----

    /// Build an error value, or raise it when the engine is set to raise
    pub fn make_error(
        &self,
        code: impl Into<ErrorCode>,
        info: Map<String, Value>,
        level: Severity,
        trace: bool,
    ) -> Result<ErrorValue> {
        let err = ErrorValue::from_parts(code, info, level, trace);
        err.report();
        if self.options.exceptions {
            return Err(Error::raised(err));
        }
        Ok(err)
    }

    pub fn is_error<V: IsError + ?Sized>(&self, value: &V) -> bool {
        value.is_error()
    }

    fn fail<T>(&self, code: ErrorCode, info: Map<String, Value>) -> Result<Outcome<T>> {
        self.transition(RenderState::Failed);
        self.make_error(code, info, Severity::Error, true).map(Err)
    }

    // ---- rendering ----

    fn template_name<'n>(&'n self, name: Option<&'n str>) -> Option<&'n str> {
        name.or(self.options.template.as_deref())
    }

    /// Resolve a template name to the script that should run
    ///
    /// Falls back to the default template when `name` is `None`.
    pub fn resolve_template(&self, name: Option<&str>) -> Result<Outcome<PathBuf>> {
        self.transition(RenderState::ResolvingTemplate);

        let Some(name) = self.template_name(name) else {
            log::debug!("No template named and no default template configured");
            return self.fail(ErrorCode::Template, info([("template", Value::Null)]));
        };

        let Some(source) = self.find_template(name) else {
            return self.fail(ErrorCode::Template, info([("template", json!(name))]));
        };

        let Some(compiler) = self.compiler.as_ref() else {
            return Ok(Ok(source));
        };

        self.transition(RenderState::Compiling);
        let result = match compiler.compile(&source) {
            Ok(script) if !script.as_os_str().is_empty() => {
                log::debug!("Compiled {} to {}", source.display(), script.display());
                return Ok(Ok(script));
            }
            Ok(script) => json!(script.to_string_lossy()),
            Err(err) => serde_json::to_value(&err)?,
        };

        self.fail(
            ErrorCode::Compiler,
            info([("template", json!(name)), ("compiler", result)]),
        )
    }

    /// Resolve and execute a template, returning its captured output
    pub fn render(&self, name: Option<&str>) -> Result<Outcome<String>> {
        let script = match self.resolve_template(name)? {
            Ok(script) => script,
            Err(err) => return Ok(Err(err)),
        };
        let template = self.template_name(name).unwrap_or_default();

        self.transition(RenderState::Executing);
        let level = DepthGuard::enter(&self.depth);
        let capture = Capture::begin(&self.sink);
        let scope = Scope::new(self, template, &script);
        let executed = self.host.execute(&script, &scope);
        drop(level);

        match executed {
            Ok(()) => {
                let output = capture.finish();
                self.transition(RenderState::Done);
                Ok(Ok(output))
            }
            Err(Error::Raised(err)) => {
                drop(capture);
                self.transition(RenderState::Failed);
                Err(Error::Raised(err))
            }
            Err(err) => {
                drop(capture);
                log::debug!("Script {} failed: {}", script.display(), err);
                self.fail(
                    ErrorCode::Script,
                    info([
                        ("template", json!(template)),
                        ("script", json!(script.to_string_lossy())),
                        ("message", json!(err.to_string())),
                    ]),
                )
            }
        }
    }

    /// Render, replacing a failure with the escaped error text
    pub fn get_output(&self, name: Option<&str>) -> Result<String> {
        match self.render(name)? {
            Ok(output) => Ok(output),
            Err(_) => Ok(self.escape(&self.options.error_text)),
        }
    }

    /// Render straight to the sink
    pub fn display(&self, name: Option<&str>) -> Result<()> {
        let output = self.get_output(name)?;
        self.write_raw(&output)
    }
}

fn info<const N: usize>(entries: [(&str, Value); N]) -> Map<String, Value> {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Holds one level of render nesting, released on drop even when a host unwinds
struct DepthGuard<'a> {
    depth: &'a Cell<usize>,
}

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        Self { depth }
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

impl fmt::Display for Savant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get_output(None) {
            Ok(output) => f.write_str(&output),
            Err(err) => {
                log::error!("Render failed while formatting: {}", err);
                f.write_str(&self.escape(&self.options.error_text))
            }
        }
    }
}

impl fmt::Debug for Savant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Savant")
            .field("options", &self.options)
            .field("paths", &self.paths)
            .field("escape", &self.escape.names())
            .field("vars", &self.vars)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}
