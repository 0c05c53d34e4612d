//! Search paths for templates and resources
//!
//! Every [`PathKind`] owns an ordered stack of directory roots. The entry added
//! last is searched first, and a name only resolves to a file whose canonical
//! path stays inside the root it was found through, so `../` segments and
//! symlinks cannot reach files outside the registered directories.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

/// Marker that identifies a stream-like entry such as `file:///srv/views`
pub const SCHEME_MARKER: &str = "://";

/// Directory bundled with the crate, always searched last for resources
pub const BUNDLED_RESOURCES: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/resources/");

/// Search path category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathKind {
    Template,
    Resource,
}

impl PathKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathKind::Template => "template",
            PathKind::Resource => "resource",
        }
    }

    /// The directory every set of this kind falls back to
    pub fn fallback(&self) -> PathSpec {
        match self {
            PathKind::Template => PathSpec::List(vec![".".to_string()]),
            PathKind::Resource => PathSpec::List(vec![BUNDLED_RESOURCES.to_string()]),
        }
    }
}

impl fmt::Display for PathKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directories supplied by a caller or a config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSpec {
    /// A path-list string such as `views:shared/views`
    Delimited(String),
    /// Directories taken as given
    List(Vec<String>),
}

impl Default for PathSpec {
    fn default() -> Self {
        PathSpec::List(Vec::new())
    }
}

impl PathSpec {
    /// Directories in insertion order
    ///
    /// Path-list strings are reversed so that, once pushed onto the stack, the
    /// leftmost directory is searched first.
    fn into_dirs(self) -> Vec<String> {
        match self {
            PathSpec::Delimited(text) if !is_stream(&text) => {
                let mut dirs: Vec<String> = std::env::split_paths(&text)
                    .map(|dir| dir.to_string_lossy().into_owned())
                    .collect();
                dirs.reverse();
                dirs
            }
            PathSpec::Delimited(text) => vec![text],
            PathSpec::List(dirs) => dirs,
        }
    }
}

impl From<&str> for PathSpec {
    fn from(text: &str) -> Self {
        PathSpec::Delimited(text.to_string())
    }
}

impl From<String> for PathSpec {
    fn from(text: String) -> Self {
        PathSpec::Delimited(text)
    }
}

impl From<Vec<String>> for PathSpec {
    fn from(dirs: Vec<String>) -> Self {
        PathSpec::List(dirs)
    }
}

impl From<Vec<&str>> for PathSpec {
    fn from(dirs: Vec<&str>) -> Self {
        PathSpec::List(dirs.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for PathSpec {
    fn from(dirs: &[&str]) -> Self {
        PathSpec::List(dirs.iter().map(|d| d.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for PathSpec {
    fn from(dirs: [&str; N]) -> Self {
        PathSpec::List(dirs.iter().map(|d| d.to_string()).collect())
    }
}

impl From<&Path> for PathSpec {
    fn from(dir: &Path) -> Self {
        PathSpec::List(vec![dir.to_string_lossy().into_owned()])
    }
}

impl From<PathBuf> for PathSpec {
    fn from(dir: PathBuf) -> Self {
        PathSpec::from(dir.as_path())
    }
}

impl<T: Into<PathSpec>> From<Option<T>> for PathSpec {
    fn from(spec: Option<T>) -> Self {
        spec.map(Into::into).unwrap_or_default()
    }
}

fn is_stream(text: &str) -> bool {
    text.find(SCHEME_MARKER).is_some_and(|pos| pos > 0)
}

fn is_readable_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false) && File::open(path).is_ok()
}

/// A single normalized search root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEntry {
    dir: String,
    stream: bool,
}

impl PathEntry {
    /// Normalize a directory, returns `None` for blank input
    pub fn parse(raw: &str) -> Option<Self> {
        let mut dir = raw.trim().to_string();
        if dir.is_empty() {
            return None;
        }

        let stream = is_stream(&dir);
        if stream {
            if !dir.ends_with('/') {
                dir.push('/');
            }
        } else if !dir.ends_with(MAIN_SEPARATOR) {
            dir.push(MAIN_SEPARATOR);
        }

        Some(Self { dir, stream })
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn is_stream(&self) -> bool {
        self.stream
    }

    /// Find `file` under this root
    pub fn locate(&self, file: &str) -> Option<PathBuf> {
        let candidate = format!("{}{}", self.dir, file);

        if self.stream {
            // Only local streams can be probed, other schemes are never found
            let Some(local) = candidate.strip_prefix("file://") else {
                log::debug!("Skipping unsupported stream entry {}", self.dir);
                return None;
            };
            let path = PathBuf::from(local);
            return is_readable_file(&path).then_some(path);
        }

        let root = fs::canonicalize(&self.dir).ok()?;
        let full = fs::canonicalize(&candidate).ok()?;

        if !full.starts_with(&root) {
            log::warn!(
                "Rejected '{}': resolves outside search root {}",
                file,
                root.display()
            );
            return None;
        }

        is_readable_file(&full).then_some(full)
    }
}

/// Ordered search roots for one [`PathKind`]
#[derive(Debug, Clone)]
pub struct PathSet {
    kind: PathKind,
    entries: Vec<PathEntry>,
}

impl PathSet {
    /// Create a set holding only the fallback directory
    pub fn new(kind: PathKind) -> Self {
        let mut set = Self {
            kind,
            entries: Vec::new(),
        };
        set.set(PathSpec::default());
        set
    }

    pub fn kind(&self) -> PathKind {
        self.kind
    }

    /// Replace the caller directories, keeping the fallback as last resort
    pub fn set(&mut self, spec: impl Into<PathSpec>) {
        self.entries.clear();
        self.add(self.kind.fallback());
        self.add(spec);
    }

    /// Push directories onto the front of the search order
    pub fn add(&mut self, spec: impl Into<PathSpec>) {
        for dir in spec.into().into_dirs() {
            if let Some(entry) = PathEntry::parse(&dir) {
                self.entries.insert(0, entry);
            }
        }
    }

    /// Resolve a logical file name to the first matching file
    pub fn resolve(&self, file: &str) -> Option<PathBuf> {
        let found = self.entries.iter().find_map(|entry| entry.locate(file));
        if found.is_none() {
            log::debug!("No {} found for '{}'", self.kind, file);
        }
        found
    }

    pub fn entries(&self) -> &[PathEntry] {
        &self.entries
    }

    /// Entry directories in search order
    pub fn dirs(&self) -> Vec<&str> {
        self.entries.iter().map(PathEntry::dir).collect()
    }
}

/// Template and resource search paths of one engine
#[derive(Debug, Clone)]
pub struct PathRegistry {
    template: PathSet,
    resource: PathSet,
}

impl Default for PathRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PathRegistry {
    pub fn new() -> Self {
        Self {
            template: PathSet::new(PathKind::Template),
            resource: PathSet::new(PathKind::Resource),
        }
    }

    pub fn get(&self, kind: PathKind) -> &PathSet {
        match kind {
            PathKind::Template => &self.template,
            PathKind::Resource => &self.resource,
        }
    }

    pub fn get_mut(&mut self, kind: PathKind) -> &mut PathSet {
        match kind {
            PathKind::Template => &mut self.template,
            PathKind::Resource => &mut self.resource,
        }
    }

    pub fn set(&mut self, kind: PathKind, spec: impl Into<PathSpec>) {
        self.get_mut(kind).set(spec);
    }

    pub fn add(&mut self, kind: PathKind, spec: impl Into<PathSpec>) {
        self.get_mut(kind).add(spec);
    }

    pub fn resolve(&self, kind: PathKind, file: &str) -> Option<PathBuf> {
        self.get(kind).resolve(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dir_entry(path: &Path) -> String {
        format!("{}{}", path.display(), MAIN_SEPARATOR)
    }

    #[test]
    fn test_entry_normalization() {
        let entry = PathEntry::parse("  views ").unwrap();
        assert_eq!(entry.dir(), format!("views{}", MAIN_SEPARATOR));
        assert!(!entry.is_stream());

        let stream = PathEntry::parse("file:///srv/views").unwrap();
        assert_eq!(stream.dir(), "file:///srv/views/");
        assert!(stream.is_stream());

        assert!(PathEntry::parse("   ").is_none());
    }

    #[test]
    fn test_scheme_marker_at_start_is_not_a_stream() {
        assert!(!is_stream("://views"));
        assert!(is_stream("mem://views"));
    }

    #[test]
    fn test_new_set_holds_only_fallback() {
        let set = PathSet::new(PathKind::Template);
        assert_eq!(set.dirs(), vec![format!(".{}", MAIN_SEPARATOR)]);

        let resources = PathSet::new(PathKind::Resource);
        assert_eq!(resources.dirs(), vec![BUNDLED_RESOURCES]);
    }

    #[test]
    fn test_add_list_puts_last_added_first() {
        let mut set = PathSet::new(PathKind::Template);
        set.add(vec!["a", "b"]);

        let sep = MAIN_SEPARATOR;
        assert_eq!(
            set.dirs(),
            vec![format!("b{}", sep), format!("a{}", sep), format!(".{}", sep)]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_delimited_string_keeps_textual_priority() {
        let mut set = PathSet::new(PathKind::Template);
        set.set("a:b:c");
        assert_eq!(set.dirs(), vec!["a/", "b/", "c/", "./"]);

        // Same order as adding c, b, a one at a time
        let mut manual = PathSet::new(PathKind::Template);
        manual.add("c");
        manual.add("b");
        manual.add("a");
        assert_eq!(set.dirs(), manual.dirs());
    }

    #[test]
    fn test_stream_string_is_not_split() {
        let mut set = PathSet::new(PathKind::Template);
        set.set("file:///srv/a:b");
        assert_eq!(set.entries().len(), 2);
        assert!(set.entries()[0].is_stream());
    }

    #[test]
    fn test_set_clears_previous_entries() {
        let mut set = PathSet::new(PathKind::Template);
        set.add(vec!["old"]);
        set.set(vec!["new"]);

        let sep = MAIN_SEPARATOR;
        assert_eq!(set.dirs(), vec![format!("new{}", sep), format!(".{}", sep)]);
    }

    #[test]
    fn test_resolve_prefers_last_added() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        fs::write(a.path().join("page.tpl"), "from a").unwrap();
        fs::write(b.path().join("page.tpl"), "from b").unwrap();

        let mut set = PathSet::new(PathKind::Template);
        set.add(vec![dir_entry(a.path())]);
        set.add(vec![dir_entry(b.path())]);

        let found = set.resolve("page.tpl").unwrap();
        assert_eq!(fs::read_to_string(found).unwrap(), "from b");
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let root = TempDir::new().unwrap();
        let views = root.path().join("views");
        fs::create_dir(&views).unwrap();
        fs::write(root.path().join("secret.txt"), "secret").unwrap();

        let mut set = PathSet::new(PathKind::Template);
        set.set(vec![dir_entry(&views)]);

        assert!(set.resolve("../secret.txt").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let outside = TempDir::new().unwrap();
        let views = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.tpl"), "secret").unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret.tpl"),
            views.path().join("link.tpl"),
        )
        .unwrap();

        let mut set = PathSet::new(PathKind::Template);
        set.set(vec![dir_entry(views.path())]);

        assert!(set.resolve("link.tpl").is_none());
    }

    #[test]
    fn test_resolve_skips_directories() {
        let views = TempDir::new().unwrap();
        fs::create_dir(views.path().join("partials")).unwrap();

        let mut set = PathSet::new(PathKind::Template);
        set.set(vec![dir_entry(views.path())]);

        assert!(set.resolve("partials").is_none());
    }

    #[test]
    fn test_fallback_resolves_with_empty_caller_set() {
        let mut set = PathSet::new(PathKind::Resource);
        set.set(PathSpec::default());

        let found = set.resolve("doctype.html").unwrap();
        assert!(found.ends_with("doctype.html"));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_stream_entry_resolves_without_containment() {
        let views = TempDir::new().unwrap();
        fs::write(views.path().join("page.tpl"), "stream").unwrap();

        let mut set = PathSet::new(PathKind::Template);
        set.set(format!("file://{}", views.path().display()));

        let found = set.resolve("page.tpl").unwrap();
        assert_eq!(fs::read_to_string(found).unwrap(), "stream");
    }

    #[test]
    fn test_registry_keeps_kinds_apart() {
        let mut registry = PathRegistry::new();
        registry.add(PathKind::Template, vec!["views"]);

        assert_eq!(registry.get(PathKind::Template).entries().len(), 2);
        assert_eq!(registry.get(PathKind::Resource).entries().len(), 1);
    }
}
