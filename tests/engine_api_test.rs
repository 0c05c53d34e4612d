use savant::bindings::RESERVED_KEY;
use savant::prelude::*;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_reserved_binding_is_rejected() {
    let mut engine = Savant::new();

    assert!(!engine.assign(RESERVED_KEY, json!({"secret": true})));
    assert!(engine.assign("user", "ann"));
    assert!(engine.assign_map([("ok", json!(1)), (RESERVED_KEY, json!(2))]));

    assert!(!engine.bindings().contains(RESERVED_KEY));
    assert_eq!(engine.bindings().get("user"), Some(&json!("ann")));
    assert_eq!(engine.bindings().get("ok"), Some(&json!(1)));
}

#[test]
fn test_assign_from_non_object_binds_nothing() {
    let mut engine = Savant::new();

    assert!(!engine.assign_from(&vec![1, 2, 3]).unwrap());
    assert!(engine.bindings().is_empty());
}

#[test]
fn test_escape_override_leaves_chain_untouched() {
    let mut engine = Savant::new();
    let upper = Escaper::builtin("upper").unwrap();

    assert_eq!(engine.escape("<b>"), "&lt;b&gt;");
    assert_eq!(engine.escape_with("<b>", &[upper.clone()]), "<B>");
    assert_eq!(engine.escape_chain().names(), vec!["htmlspecialchars"]);

    engine.add_escape([upper]);
    assert_eq!(engine.escape("<b>"), "&LT;B&GT;");

    engine.set_escape([Escaper::new("brackets", |v: &str| format!("[{}]", v))]);
    assert_eq!(engine.escape("x"), "[x]");
    assert_eq!(engine.escape_chain().names(), vec!["brackets"]);
}

#[test]
fn test_empty_escape_chain_passes_values_through() {
    let mut engine = Savant::new();
    engine.set_escape(Vec::new());

    assert_eq!(engine.escape("<i>&</i>"), "<i>&</i>");
}

#[test]
fn test_make_error_returns_value_or_raises() {
    let mut engine = Savant::new();
    let mut info = serde_json::Map::new();
    info.insert("field".to_string(), json!("email"));

    let err = engine
        .make_error("ERR_INVALID", info.clone(), Severity::Warning, false)
        .unwrap();
    assert!(is_error(&err));
    assert_eq!(err.code().as_str(), "ERR_INVALID");
    assert_eq!(err.level(), Severity::Warning);
    assert!(!err.trace());

    engine.set_exceptions(true);
    let raised = engine
        .make_error("ERR_INVALID", info, Severity::Warning, false)
        .unwrap_err();
    assert_eq!(raised.raised_value(), Some(&err));
}

#[test]
fn test_is_error_on_arbitrary_values() {
    let engine = Savant::new();

    assert!(!engine.is_error("plain text"));
    assert!(!engine.is_error(&json!({"code": "ERR_TEMPLATE"})));
    assert!(engine.is_error(&ErrorValue::new(ErrorCode::Script)));
}

#[test]
fn test_engine_from_config_file() {
    let dir = TempDir::new().unwrap();
    let views = dir.path().join("views");
    fs::create_dir(&views).unwrap();
    fs::write(views.join("home.tpl"), "@{greeting}, @{escape(this.name, 'upper')}").unwrap();

    let config_path = dir.path().join("savant.toml");
    fs::write(
        &config_path,
        format!(
            "template_path = [{:?}]\ntemplate = \"home.tpl\"\nextract = true\nescape = [\"strip_tags\"]\n",
            views.to_string_lossy()
        ),
    )
    .unwrap();

    let config = SavantConfig::from_file(&config_path).unwrap();
    let mut engine = Savant::from_config(&config)
        .unwrap()
        .with_sink(MemorySink::new());
    engine.assign("greeting", "<em>Hi</em>");
    engine.assign("name", "ann");

    assert_eq!(engine.template(), Some("home.tpl"));
    assert_eq!(engine.escape_chain().names(), vec!["strip_tags"]);
    assert_eq!(engine.render(None).unwrap().unwrap(), "Hi, ANN");
}

#[test]
fn test_engine_from_config_rejects_unknown_escaper() {
    let config = SavantConfig {
        escape: vec!["shout".to_string()],
        ..Default::default()
    };

    let err = Savant::from_config(&config).unwrap_err();
    assert_eq!(err.error_code(), "E_CONFIG");
}

#[test]
fn test_empty_configured_escape_list_keeps_default_chain() {
    let config = SavantConfig {
        escape: Vec::new(),
        ..Default::default()
    };

    let engine = Savant::from_config(&config).unwrap();
    assert_eq!(engine.escape_chain().names(), vec!["htmlspecialchars"]);
}

#[test]
fn test_display_renders_default_template() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("index.tpl"), "index & more").unwrap();

    let mut engine = Savant::new().with_sink(MemorySink::new());
    engine.set_path(PathKind::Template, dir.path());
    assert_eq!(engine.to_string(), engine.escape(DEFAULT_ERROR_TEXT));

    engine.set_template(Some("index.tpl"));
    assert_eq!(format!("{}", engine), "index & more");
}
