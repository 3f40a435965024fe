//! Syntax guard – hides template syntax from the HTML and CSS stages.
//!
//! Every `{{ … }}`, `{% … %}` and `{# … #}` span is swapped for an opaque
//! placeholder before the markup is parsed, and swapped back afterwards.
//! The originals live in a side table owned by the guard; the placeholder
//! only carries the guard's nonce and an index into that table.
//!
//! Placeholders are delimited by the private-use code points U+E000 and
//! U+E001, which neither the markup serializer nor the style inliner ever
//! produce. They contain no whitespace, quotes, `=`, `/`, `<` or `>`, so the
//! markup parser keeps them intact in text, attribute values, and even
//! inside a start tag. They do contain `:`, so any stage that parses
//! attribute contents must check [`contains_placeholder`] first and leave
//! such values untouched, as the style inliner does for `style`.
//!
//! Limitation: spans are matched non-greedily, so expressions containing
//! nested closing braces (`{{ {'a': 1} }}`) are not supported.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use regex::{Captures, Regex};

const OPEN: char = '\u{E000}';
const CLOSE: char = '\u{E001}';

/// Tags consumed by layout resolution; never protected.
const STRUCTURAL_TAGS: [&str; 3] = ["block", "endblock", "extends"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// `{{ expression }}`
    Variable,
    /// `{% tag %}`
    FlowControl,
    /// `{# comment #}`
    Comment,
}

/// One protected span of template syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedToken {
    pub id: usize,
    pub original_text: String,
    pub kind: TokenKind,
}

fn syntax_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)\{\{.*?\}\}|\{%.*?%\}|\{#.*?#\}").expect("valid syntax regex")
    })
}

fn tag_keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\{%-?\s*(\w+)").expect("valid keyword regex"))
}

/// Per-compile placeholder table.
#[derive(Debug)]
pub struct SyntaxGuard {
    nonce: String,
    placeholder_re: Regex,
    tokens: Vec<ProtectedToken>,
}

impl Default for SyntaxGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntaxGuard {
    /// A guard with a freshly drawn nonce and an empty table.
    pub fn new() -> Self {
        let nonce = fresh_nonce();
        let pattern = format!(
            "{}mf:{}:([0-9]+){}",
            regex::escape(&OPEN.to_string()),
            regex::escape(&nonce),
            regex::escape(&CLOSE.to_string())
        );
        Self {
            placeholder_re: Regex::new(&pattern).expect("escaped nonce forms a valid regex"),
            nonce,
            tokens: Vec::new(),
        }
    }

    /// Tokens recorded so far, in id order.
    pub fn tokens(&self) -> &[ProtectedToken] {
        &self.tokens
    }

    /// Replace dynamic syntax with placeholders.
    pub fn protect(&mut self, html: &str) -> String {
        syntax_re()
            .replace_all(html, |caps: &Captures| {
                let text = &caps[0];
                let kind = match &text[..2] {
                    "{{" => TokenKind::Variable,
                    "{#" => TokenKind::Comment,
                    _ => {
                        if is_structural(text) {
                            return text.to_string();
                        }
                        TokenKind::FlowControl
                    }
                };
                let id = self.tokens.len();
                self.tokens.push(ProtectedToken {
                    id,
                    original_text: text.to_string(),
                    kind,
                });
                self.placeholder(id)
            })
            .into_owned()
    }

    /// Swap placeholders back for their original text.
    ///
    /// Placeholders from other guards, or with unknown ids, are left as-is.
    pub fn restore(&self, html: &str) -> String {
        self.placeholder_re
            .replace_all(html, |caps: &Captures| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|id| self.tokens.get(id))
                    .map(|t| t.original_text.clone())
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    fn placeholder(&self, id: usize) -> String {
        format!("{OPEN}mf:{}:{id}{CLOSE}", self.nonce)
    }
}

/// True if `text` holds at least one placeholder from any guard.
pub fn contains_placeholder(text: &str) -> bool {
    text.contains(OPEN)
}

fn is_structural(tag: &str) -> bool {
    tag_keyword_re()
        .captures(tag)
        .map(|caps| STRUCTURAL_TAGS.contains(&&caps[1]))
        .unwrap_or(false)
}

fn fresh_nonce() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let mut bytes = Vec::with_capacity(16);
    for _ in 0..2 {
        let mut hasher = RandomState::new().build_hasher();
        hasher.write_u64(COUNTER.fetch_add(1, Ordering::Relaxed));
        bytes.extend_from_slice(&hasher.finish().to_le_bytes());
    }
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(input: &str) -> String {
        let mut guard = SyntaxGuard::new();
        let protected = guard.protect(input);
        guard.restore(&protected)
    }

    #[test]
    fn round_trip_is_lossless() {
        let samples = [
            "",
            "plain text",
            "<p>Hello {{ name }}</p>",
            "<a href=\"{{ url | safe }}\" {% if x %}class=\"on\"{% endif %}>go</a>",
            "{% for i in items %}\n<tr><td>{{ i.label }}</td></tr>\n{% endfor %}",
            "{# note #}<p style=\"color: {{ c }}\">x</p>",
            "{{a}}{{b}}{%c%}",
            "unterminated {{ oops",
            "{% block body %}{{ x }}{% endblock %}",
        ];
        for s in samples {
            assert_eq!(round_trip(s), s);
        }
    }

    #[test]
    fn protected_output_hides_syntax() {
        let mut guard = SyntaxGuard::new();
        let out = guard.protect("<p>{{ a }}{% if b %}{# c #}</p>");
        assert!(!out.contains("{{"));
        assert!(!out.contains("{%"));
        assert!(!out.contains("{#"));
        let kinds: Vec<_> = guard.tokens().iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![TokenKind::Variable, TokenKind::FlowControl, TokenKind::Comment]
        );
    }

    #[test]
    fn structural_tags_are_left_alone() {
        let mut guard = SyntaxGuard::new();
        let src = "{%- extends 'x' %}{% block a %}{% endblock a %}";
        assert_eq!(guard.protect(src), src);
        assert!(guard.tokens().is_empty());
    }

    #[test]
    fn ids_are_unique_and_sequential() {
        let mut guard = SyntaxGuard::new();
        guard.protect("{{ a }}{{ a }}");
        guard.protect("{{ b }}");
        let ids: Vec<_> = guard.tokens().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn placeholders_are_detectable() {
        let mut guard = SyntaxGuard::new();
        assert!(contains_placeholder(&guard.protect("color: {{ c }}")));
        assert!(!contains_placeholder(&guard.protect("color: red")));
    }

    #[test]
    fn foreign_placeholders_are_untouched() {
        let mut first = SyntaxGuard::new();
        let second = SyntaxGuard::new();
        let protected = first.protect("{{ a }}");
        assert_eq!(second.restore(&protected), protected);
    }
}
