//! Error types shared by every compile stage.
//!
//! [`CompileError`] is fatal for the template being compiled. The markup and
//! style stages report [`RenderDegraded`] instead, which the pipeline only
//! logs before carrying on with the stage's unmodified input.

use std::path::PathBuf;

use thiserror::Error;

use crate::dom::MarkupError;
use crate::style::StyleError;

/// Fatal compile errors.
#[derive(Debug, Error)]
pub enum CompileError {
    /// Template, layout, or include file does not exist
    #[error("template not found: {0}")]
    NotFound(String),

    /// Resolved path leaves the confined source root
    #[error("path '{}' escapes source root '{}'", path.display(), root.display())]
    PathEscape {
        /// Canonical path that was resolved
        path: PathBuf,
        /// Canonical source root
        root: PathBuf,
    },

    /// Target exists but is not a regular file
    #[error("not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    /// Include or extends cycle
    #[error("circular reference to '{0}'")]
    Circular(String),

    /// Include or layout nesting deeper than the configured cap
    #[error("nesting deeper than {max} levels while resolving '{name}'")]
    DepthExceeded {
        /// Template or include being resolved when the cap tripped
        name: String,
        /// Configured maximum depth
        max: usize,
    },

    /// Malformed configuration file
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// Any other I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Non-fatal stage failure. Never aborts a compile.
#[derive(Debug, Error)]
pub enum RenderDegraded {
    #[error("markup normalization skipped: {0}")]
    Markup(#[from] MarkupError),

    #[error("style inlining skipped: {0}")]
    Style(#[from] StyleError),
}

pub type Result<T> = std::result::Result<T, CompileError>;
