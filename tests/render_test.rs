use savant::prelude::*;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn engine_with_sink(dir: &Path) -> (Savant, MemorySink) {
    let memory = MemorySink::new();
    let mut engine = Savant::new().with_sink(memory.clone());
    engine.set_path(PathKind::Template, dir);
    (engine, memory)
}

fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).expect("Failed to write fixture");
}

#[test]
fn test_missing_template_returns_error_value() {
    let dir = TempDir::new().unwrap();
    let (engine, memory) = engine_with_sink(dir.path());

    let outcome = engine.render(Some("nope.tpl")).unwrap();
    assert!(is_error(&outcome));

    let err = outcome.unwrap_err();
    assert_eq!(err.code().as_str(), "ERR_TEMPLATE");
    assert_eq!(err.info_value("template"), Some(&json!("nope.tpl")));
    assert_eq!(
        engine.get_output(Some("nope.tpl")).unwrap(),
        engine.escape(DEFAULT_ERROR_TEXT)
    );
    assert!(memory.is_empty());
}

#[test]
fn test_exceptions_policy_raises_instead_of_returning() {
    let dir = TempDir::new().unwrap();
    let (mut engine, _memory) = engine_with_sink(dir.path());
    engine.set_exceptions(true);

    match engine.render(Some("nope.tpl")) {
        Err(Error::Raised(value)) => {
            assert_eq!(value.code(), &ErrorCode::Template);
            assert_eq!(value.info_value("template"), Some(&json!("nope.tpl")));
        }
        other => panic!("Expected a raised error, got {:?}", other),
    }
}

#[test]
fn test_raised_error_in_nested_render_reaches_caller() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "outer.tpl", "start @{include('gone.tpl')} end");
    let (mut engine, memory) = engine_with_sink(dir.path());
    engine.set_exceptions(true);

    let err = engine.render(Some("outer.tpl")).unwrap_err();
    assert_eq!(err.error_code(), "ERR_TEMPLATE");
    assert_eq!(
        err.raised_value().and_then(|v| v.info_value("template")),
        Some(&json!("gone.tpl"))
    );
    assert!(memory.is_empty());
}

#[test]
fn test_failed_script_writes_nothing_to_sink() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "page.tpl",
        "<html>@{foreach n in [1, 2, 3]}<p>@{n}</p>@{end}@{raise('halfway')}</html>",
    );
    let (engine, memory) = engine_with_sink(dir.path());

    engine.display(Some("page.tpl")).unwrap();
    assert_eq!(memory.contents(), engine.escape(DEFAULT_ERROR_TEXT));

    let err = engine.render(Some("page.tpl")).unwrap().unwrap_err();
    assert_eq!(err.code(), &ErrorCode::Script);
    assert_eq!(err.info_value("template"), Some(&json!("page.tpl")));
    assert!(err.info_value("message").unwrap().as_str().unwrap().contains("halfway"));
    assert_eq!(engine.state(), RenderState::Failed);
}

#[test]
fn test_failed_include_keeps_outer_capture_clean() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "broken.tpl", "inner text @{raise('inner')}");
    write(dir.path(), "outer.tpl", "outer @{include('broken.tpl')}");
    let (engine, memory) = engine_with_sink(dir.path());

    let err = engine.render(Some("outer.tpl")).unwrap().unwrap_err();
    assert_eq!(err.code(), &ErrorCode::Script);
    assert_eq!(err.info_value("template"), Some(&json!("outer.tpl")));
    assert!(memory.is_empty());
}

#[test]
fn test_successful_render_returns_output_without_writing() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "page.tpl", "<h1>@{this.title}</h1>");
    let (mut engine, memory) = engine_with_sink(dir.path());
    engine.assign("title", "Fish & Chips");

    assert_eq!(
        engine.render(Some("page.tpl")).unwrap().unwrap(),
        "<h1>Fish &amp; Chips</h1>"
    );
    assert!(memory.is_empty());

    engine.display(Some("page.tpl")).unwrap();
    assert_eq!(memory.contents(), "<h1>Fish &amp; Chips</h1>");
}

#[test]
fn test_search_path_priority() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    let c = TempDir::new().unwrap();
    write(a.path(), "page.tpl", "from a");
    write(b.path(), "page.tpl", "from b");
    write(b.path(), "only_b.tpl", "only b");
    write(c.path(), "page.tpl", "from c");

    let list = env::join_paths([a.path(), b.path(), c.path()]).unwrap();
    let mut engine = Savant::new().with_sink(MemorySink::new());
    engine.set_path(PathKind::Template, list.to_string_lossy().into_owned());

    assert_eq!(engine.render(Some("page.tpl")).unwrap().unwrap(), "from a");
    assert_eq!(engine.render(Some("only_b.tpl")).unwrap().unwrap(), "only b");

    engine.add_path(PathKind::Template, c.path());
    assert_eq!(engine.render(Some("page.tpl")).unwrap().unwrap(), "from c");
}

#[test]
fn test_traversal_outside_search_root_is_not_found() {
    let root = TempDir::new().unwrap();
    let views = root.path().join("views");
    fs::create_dir(&views).unwrap();
    write(root.path(), "secret.tpl", "secret");
    write(&views, "page.tpl", "@{include('../secret.tpl')}");

    let (engine, _memory) = engine_with_sink(&views);

    let err = engine.render(Some("../secret.tpl")).unwrap().unwrap_err();
    assert_eq!(err.code(), &ErrorCode::Template);
    assert!(engine.find_template("../secret.tpl").is_none());

    let err = engine.render(Some("page.tpl")).unwrap().unwrap_err();
    assert_eq!(err.code(), &ErrorCode::Script);
    assert!(err.info_value("message").unwrap().as_str().unwrap().contains("secret.tpl"));
}

#[test]
fn test_compiler_output_is_executed() {
    let dir = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write(dir.path(), "page.md", "hello @{this.who}");

    let out_dir = out.path().to_path_buf();
    let (engine, _memory) = engine_with_sink(dir.path());
    let mut engine = engine.with_compiler(move |source: &Path| -> Outcome<PathBuf> {
        let text = fs::read_to_string(source)
            .map_err(|e| ErrorValue::new("ERR_READ").with_info("reason", json!(e.to_string())))?;
        let target = out_dir.join("page.compiled");
        fs::write(&target, format!("<p>{}</p>", text))
            .map_err(|e| ErrorValue::new("ERR_WRITE").with_info("reason", json!(e.to_string())))?;
        Ok(target)
    });
    engine.assign("who", "world");

    assert_eq!(engine.render(Some("page.md")).unwrap().unwrap(), "<p>hello world</p>");
}

#[test]
fn test_compiler_error_value_is_reported_in_info() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "page.md", "text");
    let (engine, _memory) = engine_with_sink(dir.path());
    let engine = engine.with_compiler(|_: &Path| -> Outcome<PathBuf> {
        Err(ErrorValue::new("ERR_SYNTAX").with_info("line", json!(3)))
    });

    let err = engine.render(Some("page.md")).unwrap().unwrap_err();
    assert_eq!(err.code(), &ErrorCode::Compiler);
    let compiler = err.info_value("compiler").unwrap();
    assert_eq!(compiler["code"], "ERR_SYNTAX");
    assert_eq!(compiler["info"]["line"], 3);
}

#[test]
fn test_extract_controls_bare_names() {
    #[derive(Serialize)]
    struct Page {
        title: String,
        tags: Vec<&'static str>,
    }

    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "page.tpl",
        "[@{title}|@{this.title}|@{foreach t in tags}@{t};@{end}]",
    );
    let (mut engine, _memory) = engine_with_sink(dir.path());
    let bound = engine
        .assign_from(&Page {
            title: "News".to_string(),
            tags: vec!["a", "b"],
        })
        .unwrap();
    assert!(bound);

    assert_eq!(engine.render(Some("page.tpl")).unwrap().unwrap(), "[|News|]");

    engine.set_extract(true);
    assert_eq!(engine.render(Some("page.tpl")).unwrap().unwrap(), "[News|News|a;b;]");
}

#[test]
fn test_resources_resolve_from_their_own_path() {
    let views = TempDir::new().unwrap();
    let assets = TempDir::new().unwrap();
    fs::write(assets.path().join("logo.svg"), "<svg/>").unwrap();
    write(
        views.path(),
        "page.tpl",
        "@{resource('doctype.html')}@{resource('logo.svg')}",
    );

    let (mut engine, _memory) = engine_with_sink(views.path());
    engine.set_path(PathKind::Resource, assets.path());

    assert_eq!(
        engine.render(Some("page.tpl")).unwrap().unwrap(),
        "<!DOCTYPE html>\n<svg/>"
    );
    assert!(engine.find_template("logo.svg").is_none());
}
