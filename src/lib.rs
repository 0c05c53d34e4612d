//! Savant - search-path template rendering
//!
//! Savant renders templates found on an ordered stack of directories:
//! - template and resource search paths with traversal protection
//! - a configurable escape chain applied to every printed value
//! - error values, or raised errors when the engine is set to raise
//! - output captured per render and discarded when the render fails
//!
//! ```no_run
//! use savant::prelude::*;
//!
//! let mut engine = Savant::new();
//! engine.set_path(PathKind::Template, "views:shared/views");
//! engine.assign("title", "Hello");
//!
//! match engine.render(Some("index.tpl"))? {
//!     Ok(html) => println!("{}", html),
//!     Err(err) => eprintln!("render failed: {}", err),
//! }
//! # Ok::<(), savant::Error>(())
//! ```

// Enforce error handling best practices
#![cfg_attr(
    not(test),
    warn(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
    )
)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used,))]

pub mod bindings;
#[cfg(feature = "config")]
pub mod config;
pub mod engine;
pub mod error;
pub mod escape;
pub mod host;
pub mod paths;
pub mod script;
pub mod sink;

pub use bindings::Bindings;
#[cfg(feature = "config")]
pub use config::SavantConfig;
pub use engine::{api_version, Options, RenderState, Savant, DEFAULT_ERROR_TEXT};
pub use error::{is_error, Error, ErrorCode, ErrorValue, IsError, Outcome, Result, Severity};
pub use escape::{EscapeChain, Escaper};
pub use host::{Compiler, ScriptHost, Scope, MAX_FETCH_DEPTH};
pub use paths::{PathKind, PathRegistry, PathSet, PathSpec};
pub use script::ScriptEngine;
pub use sink::MemorySink;

pub mod prelude {
    pub use crate::*;
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::json;
}
