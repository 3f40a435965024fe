//! Pipeline – ties together layout resolution, include inlining, syntax
//! protection, markup normalization, and style inlining.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::Serialize;
use walkdir::WalkDir;

use crate::config::{CompileConfig, TEMPLATE_EXT};
use crate::error::{RenderDegraded, Result};
use crate::guard::SyntaxGuard;
use crate::include::IncludeInliner;
use crate::layout::{has_extends, LayoutResolver};
use crate::normalize::normalize;
use crate::style::{CssInliner, StyleError, StyleInliner};
use crate::template::{canonical_root, TemplateHandle};

/// One compiled template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledOutput {
    pub html: String,
    pub template_name: String,
}

/// A template that failed during a batch compile.
#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub name: String,
    pub error: String,
}

/// Outcome of [`Compiler::compile_all`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub compiled: Vec<String>,
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Serialise to JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Compiles templates under one [`CompileConfig`].
pub struct Compiler<S = CssInliner> {
    config: CompileConfig,
    styles: S,
}

impl Compiler<CssInliner> {
    pub fn new(config: CompileConfig) -> Self {
        Self::with_inliner(config, CssInliner)
    }
}

impl<S: StyleInliner> Compiler<S> {
    /// Use a custom style inliner.
    pub fn with_inliner(config: CompileConfig, styles: S) -> Self {
        Self { config, styles }
    }

    pub fn config(&self) -> &CompileConfig {
        &self.config
    }

    /// Run every stage for one template. Optionally write the result to
    /// `<dist_root>/<name>.njk`.
    ///
    /// Resolution errors are returned; markup and style failures only
    /// degrade the output.
    pub fn compile_one(&self, name: &str, write_output: bool) -> Result<CompiledOutput> {
        let leaf = TemplateHandle::load(&self.config, name)?;
        log::debug!("compiling '{}'", leaf.name);

        // 1. Layout inheritance
        let mut source = LayoutResolver::new(&self.config).resolve_handle(&leaf)?;

        // 2. Partials, with a fresh cycle guard per compile
        if self.config.inline_includes {
            let inliner = IncludeInliner::new(&self.config)?;
            source = inliner.inline(&source, leaf.dir(), &mut HashSet::new())?;
        }

        // 3. Hide dynamic syntax
        let mut guard = SyntaxGuard::new();
        let protected = guard.protect(&source);

        // 4. Custom email tags
        let normalized = normalize(&protected);

        // 5. CSS
        let styled = self.inline_styles(&leaf.name, normalized);

        // 6. Bring the dynamic syntax back
        let html = guard.restore(&styled);

        if write_output {
            self.write(&leaf.name, &html)?;
        }
        Ok(CompiledOutput {
            html,
            template_name: leaf.name,
        })
    }

    fn inline_styles(&self, name: &str, html: String) -> String {
        let extra = match self.config.stylesheet() {
            None => None,
            Some(Ok(css)) => Some(css),
            Some(Err(e)) => {
                let err = RenderDegraded::from(StyleError::Stylesheet(e.to_string()));
                log::warn!("{name}: {err}");
                return html;
            }
        };
        match self.styles.inline(&html, extra) {
            Ok(styled) => styled,
            Err(e) => {
                log::warn!("{name}: {}", RenderDegraded::from(e));
                html
            }
        }
    }

    fn write(&self, name: &str, html: &str) -> Result<()> {
        let out = self.config.dist_root.join(format!("{name}.{TEMPLATE_EXT}"));
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&out, html)?;
        log::info!("wrote {}", out.display());
        Ok(())
    }

    /// Names of every compile target under the source root, sorted.
    ///
    /// Partials (`_name.njk`), anything with `layout` or `part` in its
    /// relative path, and templates without an `extends` directive are
    /// skipped.
    pub fn discover(&self) -> Result<Vec<String>> {
        let root = canonical_root(&self.config.source_root)?;
        let mut names = Vec::new();

        for entry in WalkDir::new(&root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = path.strip_prefix(&root) else {
                continue;
            };
            let Some(name) = candidate_name(relative) else {
                continue;
            };
            match fs::read_to_string(path) {
                Ok(raw) if has_extends(&raw) => names.push(name),
                Ok(_) => {}
                Err(e) => log::warn!("skipping {}: {e}", path.display()),
            }
        }
        Ok(names)
    }

    /// Compile and write every discovered template. A failing template is
    /// logged and recorded; the rest still run.
    pub fn compile_all(&self) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        for name in self.discover()? {
            match self.compile_one(&name, true) {
                Ok(_) => report.compiled.push(name),
                Err(e) => {
                    log::error!("failed to compile '{name}': {e}");
                    report.failed.push(BatchFailure {
                        name,
                        error: e.to_string(),
                    });
                }
            }
        }
        log::info!(
            "compiled {} template(s), {} failed",
            report.compiled.len(),
            report.failed.len()
        );
        Ok(report)
    }
}

/// The template name for `relative`, if its path marks it as a compile
/// target.
fn candidate_name(relative: &Path) -> Option<String> {
    if relative.extension().and_then(|e| e.to_str()) != Some(TEMPLATE_EXT) {
        return None;
    }
    let basename = relative.file_name()?.to_str()?;
    if basename.starts_with('_') {
        return None;
    }
    let parts: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    if parts.iter().any(|p| p.contains("layout") || p.contains("part")) {
        return None;
    }
    let joined = parts.join("/");
    let name = joined.strip_suffix(&format!(".{TEMPLATE_EXT}"))?;
    Some(name.to_string())
}
