//! Layout resolution – `{% extends %}` / `{% block %}` inheritance.
//!
//! A child template names its parent with `{% extends "base.njk" %}` and
//! supplies replacement content for the parent's named blocks. Resolution
//! walks the chain upwards, collecting overrides, and merges them into the
//! terminal layout (the first ancestor without an `extends` directive).
//!
//! Nested blocks are not supported: a block's content ends at the first
//! `endblock` that follows it.

use std::sync::OnceLock;

use regex::{NoExpand, Regex};

use crate::config::CompileConfig;
use crate::error::{CompileError, Result};
use crate::template::{normalize_name, TemplateHandle};

/// A named fragment supplied by a child template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockOverride {
    pub name: String,
    pub content: String,
}

fn extends_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\{%-?\s*extends\s+["']([^"']+)["']\s*-?%\}"#).expect("valid extends regex")
    })
}

fn block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)\{%-?\s*block\s+(\w+)\s*-?%\}(.*?)\{%-?\s*endblock(?:\s+\w+)?\s*-?%\}")
            .expect("valid block regex")
    })
}

fn empty_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{%-?\s*block\s+\w+\s*-?%\}\s*\{%-?\s*endblock(?:\s+\w+)?\s*-?%\}")
            .expect("valid empty block regex")
    })
}

fn named_block_re(name: &str) -> Regex {
    let pattern = format!(
        r"(?s)\{{%-?\s*block\s+{}\s*-?%\}}.*?\{{%-?\s*endblock(?:\s+\w+)?\s*-?%\}}",
        regex::escape(name)
    );
    Regex::new(&pattern).expect("escaped block name forms a valid regex")
}

/// True if `source` declares a parent layout.
pub fn has_extends(source: &str) -> bool {
    extends_re().is_match(source)
}

/// The template name referenced by the first `extends` directive, if any.
pub fn extends_target(source: &str) -> Option<String> {
    extends_re()
        .captures(source)
        .map(|caps| normalize_name(&caps[1]))
}

/// Extract every block from a child template.
///
/// Content is trimmed. Names are case-sensitive; on duplicates the last
/// occurrence wins but keeps the position of the first.
pub fn extract_blocks(source: &str) -> Vec<BlockOverride> {
    let mut blocks: Vec<BlockOverride> = Vec::new();
    for caps in block_re().captures_iter(source) {
        let name = caps[1].to_string();
        let content = caps[2].trim().to_string();
        match blocks.iter_mut().find(|b| b.name == name) {
            Some(existing) => existing.content = content,
            None => blocks.push(BlockOverride { name, content }),
        }
    }
    blocks
}

/// Block spans of a layout, tags included, keyed by name.
fn block_spans(source: &str) -> Vec<BlockOverride> {
    let mut spans: Vec<BlockOverride> = Vec::new();
    for caps in block_re().captures_iter(source) {
        let name = caps[1].to_string();
        let content = caps[0].to_string();
        match spans.iter_mut().find(|b| b.name == name) {
            Some(existing) => existing.content = content,
            None => spans.push(BlockOverride { name, content }),
        }
    }
    spans
}

/// Merge overrides into a parent layout.
///
/// Every span of an overridden block is replaced, one leading `extends`
/// directive is dropped, and blocks left empty are removed. Blocks that
/// were not overridden keep their default content and tags.
pub fn merge(parent: &str, overrides: &[BlockOverride]) -> String {
    let mut merged = parent.to_string();
    for block in overrides {
        let re = named_block_re(&block.name);
        merged = re
            .replace_all(&merged, NoExpand(block.content.as_str()))
            .into_owned();
    }
    if has_extends(&merged) {
        merged = extends_re().replace(&merged, "").into_owned();
    }
    empty_block_re().replace_all(&merged, "").into_owned()
}

/// Resolves a template's inheritance chain into a single source.
pub struct LayoutResolver<'a> {
    config: &'a CompileConfig,
}

impl<'a> LayoutResolver<'a> {
    pub fn new(config: &'a CompileConfig) -> Self {
        Self { config }
    }

    /// Load and resolve the named template.
    pub fn resolve(&self, name: &str) -> Result<String> {
        let leaf = TemplateHandle::load(self.config, name)?;
        self.resolve_handle(&leaf)
    }

    /// Resolve an already loaded template.
    ///
    /// Templates without `extends` are returned unchanged. Otherwise the
    /// leaf's blocks take priority, each intermediate layout contributes
    /// its own block spans for names still missing, and the collected set
    /// is merged into the terminal layout.
    pub fn resolve_handle(&self, leaf: &TemplateHandle) -> Result<String> {
        let Some(mut parent_name) = extends_target(&leaf.raw_text) else {
            return Ok(leaf.raw_text.clone());
        };

        let mut overrides = extract_blocks(&leaf.raw_text);
        let mut chain = vec![leaf.name.clone()];

        loop {
            if chain.contains(&parent_name) {
                return Err(CompileError::Circular(parent_name));
            }
            if chain.len() > self.config.max_depth {
                return Err(CompileError::DepthExceeded {
                    name: leaf.name.clone(),
                    max: self.config.max_depth,
                });
            }

            let parent = TemplateHandle::load(self.config, &parent_name)?;
            log::debug!("{}: layout '{}'", leaf.name, parent.name);
            chain.push(parent.name.clone());

            match extends_target(&parent.raw_text) {
                Some(next) => {
                    for span in block_spans(&parent.raw_text) {
                        if !overrides.iter().any(|b| b.name == span.name) {
                            overrides.push(span);
                        }
                    }
                    parent_name = next;
                }
                None => return Ok(merge(&parent.raw_text, &overrides)),
            }
        }
    }
}
