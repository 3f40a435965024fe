//! Include inlining – splices `{% include "partial.njk" %}` files in place.
//!
//! Includes resolve against the including file's directory first and the
//! source root second. Every resolved file must stay under the source root
//! after symlink resolution.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::config::CompileConfig;
use crate::error::{CompileError, Result};
use crate::template::{canonical_root, confine};

fn include_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\{%-?\s*include\s+["']([^"']+)["']\s*-?%\}"#).expect("valid include regex")
    })
}

/// True if `content` contains at least one include tag.
pub fn has_includes(content: &str) -> bool {
    include_re().is_match(content)
}

pub struct IncludeInliner {
    source_root: PathBuf,
    max_depth: usize,
}

impl IncludeInliner {
    pub fn new(config: &CompileConfig) -> Result<Self> {
        Ok(Self {
            source_root: canonical_root(&config.source_root)?,
            max_depth: config.max_depth,
        })
    }

    /// Replace every include tag in `content` with the included file.
    ///
    /// `visiting` holds the canonical paths currently being inlined on this
    /// call stack; callers start each top-level compile with an empty set.
    pub fn inline(
        &self,
        content: &str,
        current_dir: &Path,
        visiting: &mut HashSet<PathBuf>,
    ) -> Result<String> {
        if !has_includes(content) {
            return Ok(content.to_string());
        }

        let mut out = String::with_capacity(content.len());
        let mut last = 0;
        for caps in include_re().captures_iter(content) {
            let Some(tag) = caps.get(0) else { continue };
            out.push_str(&content[last..tag.start()]);
            out.push_str(&self.expand(&caps[1], current_dir, visiting)?);
            last = tag.end();
        }
        out.push_str(&content[last..]);
        Ok(out)
    }

    fn expand(
        &self,
        reference: &str,
        current_dir: &Path,
        visiting: &mut HashSet<PathBuf>,
    ) -> Result<String> {
        let path = self.locate(reference, current_dir)?;
        if visiting.contains(&path) {
            return Err(CompileError::Circular(path.display().to_string()));
        }
        if visiting.len() >= self.max_depth {
            return Err(CompileError::DepthExceeded {
                name: reference.to_string(),
                max: self.max_depth,
            });
        }

        log::debug!("inlining {}", path.display());
        let body = fs::read_to_string(&path)?;
        let dir = path.parent().unwrap_or(&self.source_root).to_path_buf();

        visiting.insert(path.clone());
        let inlined = self.inline(&body, &dir, visiting);
        visiting.remove(&path);
        inlined
    }

    /// Pick the first existing candidate and confine it to the source root.
    fn locate(&self, reference: &str, current_dir: &Path) -> Result<PathBuf> {
        let relative = reference.trim_start_matches('/');
        let candidates = [current_dir.join(relative), self.source_root.join(relative)];
        let found = candidates
            .iter()
            .find(|p| p.exists())
            .ok_or_else(|| CompileError::NotFound(reference.to_string()))?;
        confine(found, &self.source_root)
    }
}
