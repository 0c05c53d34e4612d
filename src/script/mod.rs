//! Built-in script host
//!
//! Scripts are plain text with `@{...}` directives:
//!
//! ```text
//! <h1>@{this.title}</h1>
//! @{if len(this.items) > 0}
//! <ul>@{foreach item in this.items}<li>@{index}: @{item.name}</li>@{end}</ul>
//! @{else}
//! @{include('empty.tpl')}
//! @{fi}
//! @{!this.trusted_html} @{escape(this.note, 'strip_tags', 'nl2br')}
//! ```
//!
//! `@{expr}` prints through the engine escape chain and `@{!expr}` prints raw.
//! Bindings are reached through `this`, or by bare name when the engine
//! extracts them into scope.

mod ast;
mod interpreter;
mod lexer;
mod parser;

pub use ast::{BinaryOperator, Expression, Node, Template, UnaryOperator};
pub use interpreter::Interpreter;
pub use lexer::{Lexer, Token, TokenKind};
pub use parser::{parse_expression, Parser};

use crate::error::Result;
use crate::host::{ScriptHost, Scope};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

/// Parse script source into a [`Template`]
pub fn parse(source: &str) -> Result<Template> {
    Parser::new(source)?.parse()
}

/// File state a cached parse was taken from
#[derive(Debug, Clone, Copy, PartialEq)]
struct Stamp {
    modified: SystemTime,
    len: u64,
}

#[derive(Clone)]
struct CacheEntry {
    template: Arc<Template>,
    stamp: Option<Stamp>,
}

/// Parsed scripts keyed by path, invalidated when the file changes
#[derive(Default)]
struct ParseCache {
    entries: RwLock<HashMap<PathBuf, CacheEntry>>,
}

impl ParseCache {
    fn stamp(path: &Path) -> Option<Stamp> {
        let metadata = fs::metadata(path).ok()?;
        Some(Stamp {
            modified: metadata.modified().ok()?,
            len: metadata.len(),
        })
    }

    // Any change to mtime or size, older mtimes included, forces a reparse
    fn get_or_parse(&self, path: &Path) -> Result<Arc<Template>> {
        let current = Self::stamp(path);

        if let Ok(entries) = self.entries.read() {
            if let Some(entry) = entries.get(path) {
                if current.is_some() && entry.stamp == current {
                    return Ok(entry.template.clone());
                }
            }
        }

        let template = Arc::new(parse(&fs::read_to_string(path)?)?);
        log::debug!("Parsed script {}", path.display());

        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                path.to_path_buf(),
                CacheEntry {
                    template: template.clone(),
                    stamp: current,
                },
            );
        }

        Ok(template)
    }

    fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}

/// The default [`ScriptHost`]
#[derive(Default)]
pub struct ScriptEngine {
    cache: Option<ParseCache>,
}

impl ScriptEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep parsed scripts between renders
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache = enabled.then(ParseCache::default);
        self
    }

    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    /// Number of scripts currently held in the cache
    pub fn cached_scripts(&self) -> usize {
        self.cache.as_ref().map(ParseCache::len).unwrap_or(0)
    }

    pub fn load(&self, script: &Path) -> Result<Arc<Template>> {
        match &self.cache {
            Some(cache) => cache.get_or_parse(script),
            None => Ok(Arc::new(parse(&fs::read_to_string(script)?)?)),
        }
    }
}

impl ScriptHost for ScriptEngine {
    fn execute(&self, script: &Path, scope: &Scope<'_>) -> Result<()> {
        let template = self.load(script)?;
        Interpreter::new(scope).run(&template)
    }

    fn reset(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("cached_scripts", &self.cached_scripts())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Savant;
    use crate::error::ErrorCode;
    use crate::paths::PathKind;
    use crate::sink::MemorySink;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        engine: Savant,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let mut engine = Savant::new().with_sink(MemorySink::new());
            engine.set_path(PathKind::Template, dir.path());
            Self { dir, engine }
        }

        fn write(&self, name: &str, source: &str) {
            fs::write(self.dir.path().join(name), source).unwrap();
        }

        fn render(&self, source: &str) -> String {
            self.write("main.tpl", source);
            self.engine.render(Some("main.tpl")).unwrap().unwrap()
        }
    }

    #[test]
    fn test_render_variables() {
        let mut fx = Fixture::new();
        fx.engine.assign("name", "<Ann>");
        fx.engine.assign("user", json!({"roles": ["admin", "dev"]}));

        assert_eq!(
            fx.render("Hi @{this.name} / @{!this.name} / @{this.user.roles.1} / @{this.missing}."),
            "Hi &lt;Ann&gt; / <Ann> / dev / ."
        );
    }

    #[test]
    fn test_render_conditionals() {
        let mut fx = Fixture::new();
        fx.engine.assign("count", 3);

        let source = "@{if this.count > 5}many@{elif this.count > 1}some@{else}none@{fi}";
        assert_eq!(fx.render(source), "some");

        fx.engine.assign("count", 0);
        assert_eq!(fx.render(source), "none");
    }

    #[test]
    fn test_render_loops() {
        let mut fx = Fixture::new();
        fx.engine.assign("items", json!(["a", "b", "c", "d"]));
        fx.engine.assign("pairs", json!({"x": 1, "y": 2}));

        assert_eq!(
            fx.render("@{foreach item in this.items}@{if item == 'c'}@{break}@{fi}@{index}=@{item};@{end}"),
            "0=a;1=b;"
        );
        assert_eq!(
            fx.render("@{foreach item in this.items}@{if index % 2 == 0}@{continue}@{fi}@{item}@{end}"),
            "bd"
        );
        assert_eq!(
            fx.render("@{foreach p in this.pairs}@{p.key}@{p.value}@{end}"),
            "x1y2"
        );
    }

    #[test]
    fn test_render_functions_and_arithmetic() {
        let mut fx = Fixture::new();
        fx.engine.assign("items", json!([1, 2, 3]));
        fx.engine.assign("word", "MiXed");

        assert_eq!(
            fx.render("@{len(this.items)} @{upper(this.word)} @{lower(this.word)} @{10 - 4 - 3} @{7 / 2} @{!json(this.items)}"),
            "3 MIXED mixed 3 3.5 [1,2,3]"
        );
    }

    #[test]
    fn test_extract_exposes_bare_names() {
        let mut fx = Fixture::new();
        fx.engine.assign("title", "Home");

        assert_eq!(fx.render("[@{title}]"), "[]");

        fx.engine.set_extract(true);
        assert_eq!(fx.render("[@{title}]"), "[Home]");
    }

    #[test]
    fn test_escape_directive_overrides_chain() {
        let mut fx = Fixture::new();
        fx.engine.assign("note", "<b>bold</b>\nnext");

        assert_eq!(
            fx.render("@{escape(this.note, 'strip_tags', 'nl2br')}"),
            "bold<br />\nnext"
        );
        assert_eq!(fx.engine.escape_chain().names(), vec!["htmlspecialchars"]);
    }

    #[test]
    fn test_include_nested_template() {
        let mut fx = Fixture::new();
        fx.engine.assign("name", "Bo");
        fx.write("part.tpl", "<@{this.name}>");

        assert_eq!(fx.render("a@{include('part.tpl')}b"), "a<Bo>b");
    }

    #[test]
    fn test_include_missing_template_fails_script() {
        let fx = Fixture::new();
        fx.write("main.tpl", "before @{include('nope.tpl')}");

        let err = fx.engine.render(Some("main.tpl")).unwrap().unwrap_err();
        assert_eq!(err.code(), &ErrorCode::Script);
        assert!(err.info_value("message").unwrap().as_str().unwrap().contains("nope.tpl"));
    }

    #[test]
    fn test_recursive_include_is_bounded() {
        let fx = Fixture::new();
        fx.write("main.tpl", "@{include('main.tpl')}");

        let err = fx.engine.render(Some("main.tpl")).unwrap().unwrap_err();
        assert_eq!(err.code(), &ErrorCode::Script);
    }

    #[test]
    fn test_resource_is_inlined_raw() {
        let mut fx = Fixture::new();
        let resources = TempDir::new().unwrap();
        fs::write(resources.path().join("style.css"), "a > b {}").unwrap();
        fx.engine.set_path(PathKind::Resource, resources.path());

        assert_eq!(fx.render("<style>@{resource('style.css')}</style>"), "<style>a > b {}</style>");
        assert_eq!(fx.render("@{resource('doctype.html')}"), "<!DOCTYPE html>\n");
    }

    #[test]
    fn test_parse_error_is_script_error() {
        let fx = Fixture::new();
        fx.write("main.tpl", "@{if this.x}unclosed");

        let err = fx.engine.render(Some("main.tpl")).unwrap().unwrap_err();
        assert_eq!(err.code(), &ErrorCode::Script);
        assert!(err.info_value("message").unwrap().as_str().unwrap().contains("Unclosed"));
    }

    #[test]
    fn test_cache_reuses_parsed_script() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cached.tpl");
        fs::write(&path, "first").unwrap();

        let engine = ScriptEngine::new().with_cache(true);
        assert!(engine.is_cached());
        let first = engine.load(&path).unwrap();
        let second = engine.load(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(engine.cached_scripts(), 1);

        engine.reset();
        assert_eq!(engine.cached_scripts(), 0);
    }

    #[test]
    fn test_cache_sees_rewrite_with_unchanged_mtime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("page.tpl");
        fs::write(&path, "first").unwrap();

        let mut engine = Savant::new()
            .with_host(ScriptEngine::new().with_cache(true))
            .with_sink(MemorySink::new());
        engine.set_path(PathKind::Template, dir.path());
        assert_eq!(engine.render(Some("page.tpl")).unwrap().unwrap(), "first");

        let stamp = fs::metadata(&path).unwrap().modified().unwrap();
        let pin = |mtime: SystemTime| {
            fs::File::options()
                .write(true)
                .open(&path)
                .unwrap()
                .set_modified(mtime)
                .unwrap();
        };

        fs::write(&path, "second, longer").unwrap();
        pin(stamp);
        assert_eq!(engine.render(Some("page.tpl")).unwrap().unwrap(), "second, longer");

        // same size, mtime moved backwards
        fs::write(&path, "second, LONGER").unwrap();
        pin(stamp - Duration::from_secs(60));
        assert_eq!(engine.render(Some("page.tpl")).unwrap().unwrap(), "second, LONGER");
    }

    #[test]
    fn test_deeply_nested_expression_is_script_error() {
        let fx = Fixture::new();
        fx.write("main.tpl", &format!("@{{{}a}}", "!".repeat(200_000)));

        let err = fx.engine.render(Some("main.tpl")).unwrap().unwrap_err();
        assert_eq!(err.code(), &ErrorCode::Script);
        assert!(err.info_value("message").unwrap().as_str().unwrap().contains("nested too deeply"));

        fx.write("main.tpl", &"@{if a}".repeat(10_000));
        let err = fx.engine.render(Some("main.tpl")).unwrap().unwrap_err();
        assert_eq!(err.code(), &ErrorCode::Script);
    }

    #[test]
    fn test_uncached_engine_reparses() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.tpl");
        fs::write(&path, "x").unwrap();

        let engine = ScriptEngine::new();
        let first = engine.load(&path).unwrap();
        let second = engine.load(&path).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(engine.cached_scripts(), 0);
    }
}
