//! Compile configuration – the explicit context threaded through every stage.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::Deserialize;

use crate::error::Result;

/// Extension shared by source templates and compiled output.
pub const TEMPLATE_EXT: &str = "njk";

/// Default cap on include and layout nesting.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Configuration for one compiler instance.
///
/// Immutable once built. The only lazily filled state is the stylesheet
/// cache, which is loaded at most once and read-only afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct CompileConfig {
    /// Directory holding the `.njk` sources (default: "templates").
    #[serde(default = "CompileConfig::default_source_root")]
    pub source_root: PathBuf,
    /// Directory compiled templates are written to (default: "dist").
    #[serde(default = "CompileConfig::default_dist_root")]
    pub dist_root: PathBuf,
    /// Optional external stylesheet inlined into every template.
    #[serde(default)]
    pub stylesheet_path: Option<PathBuf>,
    /// Splice `{% include %}` partials at compile time (default: true).
    #[serde(default = "CompileConfig::default_inline_includes")]
    pub inline_includes: bool,
    /// Maximum include/layout nesting depth (default: 32).
    #[serde(default = "CompileConfig::default_max_depth")]
    pub max_depth: usize,
    #[serde(skip)]
    stylesheet: OnceLock<std::result::Result<String, String>>,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self::new(Self::default_source_root(), Self::default_dist_root())
    }
}

impl CompileConfig {
    pub fn new(source_root: impl Into<PathBuf>, dist_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            dist_root: dist_root.into(),
            stylesheet_path: None,
            inline_includes: Self::default_inline_includes(),
            max_depth: Self::default_max_depth(),
            stylesheet: OnceLock::new(),
        }
    }

    pub fn with_stylesheet(mut self, path: impl Into<PathBuf>) -> Self {
        self.stylesheet_path = Some(path.into());
        self.stylesheet = OnceLock::new();
        self
    }

    pub fn with_inline_includes(mut self, inline: bool) -> Self {
        self.inline_includes = inline;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Deserialise from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON config file. Relative roots are resolved against the
    /// file's own directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut config = Self::from_json(&fs::read_to_string(path)?)?;
        if let Some(base) = path.parent() {
            config.source_root = base.join(&config.source_root);
            config.dist_root = base.join(&config.dist_root);
            config.stylesheet_path = config.stylesheet_path.map(|p| base.join(p));
        }
        Ok(config)
    }

    /// The external stylesheet, read on first use.
    ///
    /// `None` when no stylesheet is configured; `Some(Err(..))` when it is
    /// configured but unreadable.
    pub fn stylesheet(&self) -> Option<std::result::Result<&str, &str>> {
        let path = self.stylesheet_path.as_ref()?;
        let loaded = self.stylesheet.get_or_init(|| {
            log::debug!("loading stylesheet {}", path.display());
            fs::read_to_string(path)
                .map_err(|e| format!("cannot read stylesheet '{}': {e}", path.display()))
        });
        Some(loaded.as_deref().map_err(|e| e.as_str()))
    }

    fn default_source_root() -> PathBuf {
        PathBuf::from("templates")
    }

    fn default_dist_root() -> PathBuf {
        PathBuf::from("dist")
    }

    fn default_inline_includes() -> bool {
        true
    }

    fn default_max_depth() -> usize {
        DEFAULT_MAX_DEPTH
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_defaults() {
        let config = CompileConfig::from_json(r#"{ "source_root": "src/emails" }"#).unwrap();
        assert_eq!(config.source_root, PathBuf::from("src/emails"));
        assert_eq!(config.dist_root, PathBuf::from("dist"));
        assert!(config.inline_includes);
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
        assert!(config.stylesheet().is_none());
    }

    #[test]
    fn malformed_json_is_config_error() {
        let err = CompileConfig::from_json("{ nope").unwrap_err();
        assert!(matches!(err, crate::error::CompileError::Config(_)));
    }

    #[test]
    fn stylesheet_is_loaded_once() {
        let dir = tempfile::tempdir().unwrap();
        let css = dir.path().join("email.css");
        fs::write(&css, "p { color: red; }").unwrap();

        let config = CompileConfig::default().with_stylesheet(&css);
        assert_eq!(config.stylesheet(), Some(Ok("p { color: red; }")));

        // Later edits are not observed by the same instance.
        fs::write(&css, "p { color: blue; }").unwrap();
        assert_eq!(config.stylesheet(), Some(Ok("p { color: red; }")));
    }

    #[test]
    fn missing_stylesheet_reports_error() {
        let config = CompileConfig::default().with_stylesheet("/nonexistent/email.css");
        assert!(matches!(config.stylesheet(), Some(Err(_))));
    }

    #[test]
    fn from_file_resolves_relative_roots() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("forge.json");
        fs::write(
            &file,
            r#"{ "source_root": "src", "dist_root": "out", "stylesheet_path": "a.css", "inline_includes": false }"#,
        )
        .unwrap();
        let config = CompileConfig::from_file(&file).unwrap();
        assert_eq!(config.source_root, dir.path().join("src"));
        assert_eq!(config.dist_root, dir.path().join("out"));
        assert_eq!(config.stylesheet_path, Some(dir.path().join("a.css")));
        assert!(!config.inline_includes);
    }
}
