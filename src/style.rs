//! Style inliner – resolves CSS rules and writes them onto each element's
//! `style` attribute, since most email clients ignore `<style>` blocks.
//!
//! Rules come from an external stylesheet and from the document's own
//! `<style>` blocks. The `<style>` blocks are left in place. At-rules
//! (`@media`, `@font-face`, …) are never inlined, because they cannot be
//! expressed per element.
//!
//! A `style` attribute that carries protected template syntax is never
//! parsed: rule declarations are written first and the attribute's own text
//! follows verbatim, so it still wins the cascade for normal declarations.

use thiserror::Error;

use crate::dom::{Document, MarkupError, MarkupTree, NodeId};
use crate::guard::contains_placeholder;

/// Elements that never receive inline styles.
const METADATA_ELEMENTS: [&str; 7] = ["html", "head", "style", "script", "meta", "link", "title"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StyleError {
    #[error("{0}")]
    Markup(#[from] MarkupError),

    #[error("unterminated CSS comment at byte {0}")]
    UnterminatedComment(usize),

    #[error("unbalanced braces in CSS at byte {0}")]
    Unbalanced(usize),

    #[error("{0}")]
    Stylesheet(String),
}

/// Computes CSS and inlines it onto elements.
pub trait StyleInliner {
    /// Inline every applicable rule from `extra_css` and the document's
    /// `<style>` blocks into `html`.
    fn inline(&self, html: &str, extra_css: Option<&str>) -> Result<String, StyleError>;
}

/// The built-in [`StyleInliner`], working on the crate's own [`Document`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CssInliner;

impl StyleInliner for CssInliner {
    fn inline(&self, html: &str, extra_css: Option<&str>) -> Result<String, StyleError> {
        let mut doc = Document::parse(html)?;

        let mut rules = Vec::new();
        if let Some(css) = extra_css {
            rules.extend(parse_stylesheet(css)?);
        }
        for style in doc.query_by_tag("style") {
            rules.extend(parse_stylesheet(&doc.text(style))?);
        }
        if rules.is_empty() {
            return Ok(html.to_string());
        }

        let mut styled = 0usize;
        for id in doc.elements() {
            if let Some(style) = computed_style(&doc, id, &rules) {
                if let Some(element) = doc.element_mut(id) {
                    element.set_attr("style", &style);
                    styled += 1;
                }
            }
        }
        log::debug!("inlined {} rule(s) onto {styled} element(s)", rules.len());
        Ok(doc.serialize())
    }
}

// ---------------------------------------------------------------------------
// Stylesheet model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub property: String,
    pub value: String,
    pub important: bool,
}

/// A style rule with at least one selector this module can match.
#[derive(Debug, Clone)]
pub struct Rule {
    pub selectors: Vec<Selector>,
    pub declarations: Vec<Declaration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, Option<String>)>,
}

/// A complex selector, stored left to right. Each compound after the first
/// carries the combinator joining it to the one before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    parts: Vec<(Combinator, Compound)>,
}

/// (ids, classes + attributes, types)
pub type Specificity = (usize, usize, usize);

impl Selector {
    pub fn specificity(&self) -> Specificity {
        self.parts.iter().fold((0, 0, 0), |(a, b, c), (_, part)| {
            (
                a + usize::from(part.id.is_some()),
                b + part.classes.len() + part.attrs.len(),
                c + usize::from(part.tag.is_some()),
            )
        })
    }

    pub fn matches(&self, doc: &Document, id: NodeId) -> bool {
        !self.parts.is_empty() && self.matches_at(doc, id, self.parts.len() - 1)
    }

    fn matches_at(&self, doc: &Document, id: NodeId, index: usize) -> bool {
        let (combinator, compound) = &self.parts[index];
        if !compound.matches(doc, id) {
            return false;
        }
        if index == 0 {
            return true;
        }
        let mut ancestor = doc.parent(id);
        while let Some(candidate) = ancestor {
            if doc.element(candidate).is_none() {
                return false;
            }
            if self.matches_at(doc, candidate, index - 1) {
                return true;
            }
            if *combinator == Combinator::Child {
                return false;
            }
            ancestor = doc.parent(candidate);
        }
        false
    }
}

impl Compound {
    fn matches(&self, doc: &Document, id: NodeId) -> bool {
        let Some(element) = doc.element(id) else {
            return false;
        };
        if let Some(tag) = &self.tag {
            if !element.name.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if let Some(want) = &self.id {
            if element.id() != Some(want.as_str()) {
                return false;
            }
        }
        let classes = element.classes();
        if !self.classes.iter().all(|c| classes.contains(&c.as_str())) {
            return false;
        }
        self.attrs.iter().all(|(name, value)| match (element.attr(name), value) {
            (Some(_), None) => true,
            (Some(actual), Some(want)) => actual == want,
            (None, _) => false,
        })
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a stylesheet into inlinable rules.
///
/// At-rules and selectors this module cannot match are skipped rather than
/// rejected; only structurally broken CSS is an error.
pub fn parse_stylesheet(css: &str) -> Result<Vec<Rule>, StyleError> {
    let css = strip_comments(css)?;
    let bytes = css.as_bytes();
    let mut rules = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        match bytes[pos] {
            b if b.is_ascii_whitespace() || b == b';' => pos += 1,
            b'}' => return Err(StyleError::Unbalanced(pos)),
            b'@' => pos = skip_at_rule(&css, pos)?,
            _ => {
                let open = css[pos..]
                    .find('{')
                    .map(|i| pos + i)
                    .ok_or(StyleError::Unbalanced(pos))?;
                let close = matching_brace(&css, open)?;
                let prelude = &css[pos..open];
                let body = &css[open + 1..close];
                let selectors: Vec<Selector> = split_top_level(prelude, ',')
                    .into_iter()
                    .filter_map(parse_selector)
                    .collect();
                if !selectors.is_empty() {
                    rules.push(Rule {
                        selectors,
                        declarations: parse_declarations(body),
                    });
                }
                pos = close + 1;
            }
        }
    }
    Ok(rules)
}

fn strip_comments(css: &str) -> Result<String, StyleError> {
    let mut out = String::with_capacity(css.len());
    let mut rest = css;
    let mut offset = 0;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        let end = rest[start + 2..]
            .find("*/")
            .ok_or(StyleError::UnterminatedComment(offset + start))?;
        let consumed = start + 2 + end + 2;
        rest = &rest[consumed..];
        offset += consumed;
    }
    out.push_str(rest);
    Ok(out)
}

/// Index of the `}` closing the block opened at `open`.
fn matching_brace(css: &str, open: usize) -> Result<usize, StyleError> {
    let mut depth = 0usize;
    for (i, b) in css.bytes().enumerate().skip(open) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err(StyleError::Unbalanced(open))
}

/// Skip `@name …;` or `@name … { … }`, returning the position after it.
fn skip_at_rule(css: &str, start: usize) -> Result<usize, StyleError> {
    let rest = &css[start..];
    let semi = rest.find(';');
    let brace = rest.find('{');
    match (semi, brace) {
        (Some(s), Some(b)) if s < b => Ok(start + s + 1),
        (_, Some(b)) => Ok(matching_brace(css, start + b)? + 1),
        (Some(s), None) => Ok(start + s + 1),
        (None, None) => Ok(css.len()),
    }
}

/// Split `text` on `sep`, ignoring separators inside parentheses or
/// quoted strings.
fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (_, '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, c) if c == sep && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Parse a declaration block. `;` inside `url(…)` or quoted strings does
/// not end a declaration.
pub fn parse_declarations(body: &str) -> Vec<Declaration> {
    split_top_level(body, ';')
        .into_iter()
        .filter_map(|decl| {
            let (property, value) = decl.split_once(':')?;
            let property = property.trim().to_ascii_lowercase();
            let mut value = value.trim();
            if property.is_empty() || value.is_empty() {
                return None;
            }
            let important = value.to_ascii_lowercase().ends_with("!important");
            if important {
                value = value[..value.len() - "!important".len()].trim_end();
            }
            Some(Declaration {
                property,
                value: value.to_string(),
                important,
            })
        })
        .collect()
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Parse one complex selector; `None` if it uses unsupported syntax.
fn parse_selector(text: &str) -> Option<Selector> {
    let chars: Vec<char> = text.trim().chars().collect();
    if chars.is_empty() {
        return None;
    }
    let mut parts = Vec::new();
    let mut combinator = Combinator::Descendant;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '>' {
            combinator = Combinator::Child;
            i += 1;
            continue;
        }

        let mut compound = Compound::default();
        let mut any = false;
        while i < chars.len() && !chars[i].is_whitespace() && chars[i] != '>' {
            match chars[i] {
                '*' => i += 1,
                '.' | '#' => {
                    let kind = chars[i];
                    let start = i + 1;
                    i = start;
                    while i < chars.len() && is_ident_char(chars[i]) {
                        i += 1;
                    }
                    if i == start {
                        return None;
                    }
                    let name: String = chars[start..i].iter().collect();
                    if kind == '.' {
                        compound.classes.push(name);
                    } else {
                        compound.id = Some(name);
                    }
                }
                '[' => {
                    let close = chars[i..].iter().position(|&c| c == ']')? + i;
                    let inner: String = chars[i + 1..close].iter().collect();
                    let attr = match inner.split_once('=') {
                        Some((name, value)) => {
                            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
                            (name.trim().to_string(), Some(value.to_string()))
                        }
                        None => (inner.trim().to_string(), None),
                    };
                    if attr.0.is_empty() || !attr.0.chars().all(is_ident_char) {
                        return None;
                    }
                    compound.attrs.push(attr);
                    i = close + 1;
                }
                c if is_ident_char(c) && compound.tag.is_none() && !any => {
                    let start = i;
                    while i < chars.len() && is_ident_char(chars[i]) {
                        i += 1;
                    }
                    compound.tag = Some(chars[start..i].iter().collect::<String>().to_ascii_lowercase());
                }
                // Pseudo-classes, sibling combinators, namespaces, …
                _ => return None,
            }
            any = true;
        }
        parts.push((combinator, compound));
        combinator = Combinator::Descendant;
    }

    if combinator == Combinator::Child || parts.is_empty() {
        return None;
    }
    Some(Selector { parts })
}

// ---------------------------------------------------------------------------
// Cascade
// ---------------------------------------------------------------------------

/// The merged `style` value for one element, or `None` if no rule applies.
fn computed_style(doc: &Document, id: NodeId, rules: &[Rule]) -> Option<String> {
    let element = doc.element(id)?;
    if METADATA_ELEMENTS.contains(&element.name.as_str()) || inside_head(doc, id) {
        return None;
    }

    let mut matched: Vec<(Specificity, usize, &Declaration)> = Vec::new();
    for (order, rule) in rules.iter().enumerate() {
        let best = rule
            .selectors
            .iter()
            .filter(|s| s.matches(doc, id))
            .map(Selector::specificity)
            .max();
        if let Some(specificity) = best {
            matched.extend(rule.declarations.iter().map(|d| (specificity, order, d)));
        }
    }
    if matched.is_empty() {
        return None;
    }
    matched.sort_by_key(|(specificity, order, _)| (*specificity, *order));

    let inline_text = element.attr("style");
    let opaque = inline_text.filter(|text| contains_placeholder(text));
    let inline = match inline_text {
        Some(text) if opaque.is_none() => parse_declarations(text),
        _ => Vec::new(),
    };

    let mut merged: Vec<(String, String)> = Vec::new();
    let rule_decls = || matched.iter().map(|(_, _, d)| *d);
    for d in rule_decls().filter(|d| !d.important) {
        set_property(&mut merged, d);
    }
    for d in inline.iter().filter(|d| !d.important) {
        set_property(&mut merged, d);
    }
    for d in rule_decls().filter(|d| d.important) {
        set_property(&mut merged, d);
    }
    for d in inline.iter().filter(|d| d.important) {
        set_property(&mut merged, d);
    }

    let mut style = merged
        .iter()
        .map(|(p, v)| format!("{p}: {v};"))
        .collect::<Vec<_>>()
        .join(" ");
    if let Some(text) = opaque {
        if !style.is_empty() {
            style.push(' ');
        }
        style.push_str(text);
    }
    Some(style)
}

fn set_property(merged: &mut Vec<(String, String)>, decl: &Declaration) {
    match merged.iter_mut().find(|(p, _)| *p == decl.property) {
        Some(existing) => existing.1 = decl.value.clone(),
        None => merged.push((decl.property.clone(), decl.value.clone())),
    }
}

fn inside_head(doc: &Document, id: NodeId) -> bool {
    let mut ancestor = doc.parent(id);
    while let Some(a) = ancestor {
        if doc.element(a).is_some_and(|e| e.name == "head") {
            return true;
        }
        ancestor = doc.parent(a);
    }
    false
}
