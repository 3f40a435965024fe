//! Email markup normalizer – rewrites semantic layout tags into the
//! table-based HTML that email clients render reliably.
//!
//! | source | target |
//! |---|---|
//! | `<container class>` | `<table align=center width=100% …><tbody>…</tbody></table>` |
//! | `<row class background>` | `<tr class style="background:…">` |
//! | `<columns class padding>` | `<td class style="padding: …;">` |
//! | `<button href class style>` | `<a href class style>` |
//!
//! Passes run in that order and re-query the tree each time, so a pass sees
//! the output of the ones before it. Children are moved, never copied.

use crate::dom::{Document, MarkupError, MarkupTree};
use crate::error::RenderDegraded;

/// Inline style given to buttons that bring none of their own.
pub const DEFAULT_BUTTON_STYLE: &str = "display: inline-block; padding: 12px 24px; \
     background-color: #2563eb; color: #ffffff; text-decoration: none; \
     border-radius: 4px; font-weight: bold;";

/// Custom tags in rewrite order.
pub const REWRITE_ORDER: [&str; 4] = ["container", "row", "columns", "button"];

/// Rewrite custom tags in `protected_html`.
///
/// Never fails: if the markup cannot be parsed or rewritten the input is
/// returned unchanged and the problem is logged.
pub fn normalize(protected_html: &str) -> String {
    match try_normalize(protected_html) {
        Ok(html) => html,
        Err(e) => {
            log::warn!("{}", RenderDegraded::from(e));
            protected_html.to_string()
        }
    }
}

/// Parse, rewrite, and serialize, reporting the first failure.
pub fn try_normalize(html: &str) -> Result<String, MarkupError> {
    let mut doc = Document::parse(html)?;
    rewrite(&mut doc)?;
    Ok(doc.serialize())
}

/// Apply every rewrite pass to `tree`.
pub fn rewrite<T: MarkupTree>(tree: &mut T) -> Result<(), MarkupError> {
    for tag in REWRITE_ORDER {
        let matches = tree.query_by_tag(tag);
        if !matches.is_empty() {
            log::debug!("rewriting {} <{tag}> element(s)", matches.len());
        }
        for node in matches {
            rewrite_element(tree, tag, node)?;
        }
    }
    Ok(())
}

fn rewrite_element<T: MarkupTree>(tree: &mut T, tag: &str, node: T::Node) -> Result<(), MarkupError> {
    let attr = |name: &str| tree.attr(node, name).map(str::to_string);
    let class = attr("class");

    let (target, attrs): (&str, Vec<(&str, String)>) = match tag {
        "container" => {
            let mut attrs = vec![
                ("align", "center".to_string()),
                ("width", "100%".to_string()),
                ("cellpadding", "0".to_string()),
                ("cellspacing", "0".to_string()),
                ("border", "0".to_string()),
            ];
            attrs.extend(class.map(|c| ("class", c)));
            ("table", attrs)
        }
        "row" => {
            let mut attrs: Vec<(&str, String)> = class.map(|c| ("class", c)).into_iter().collect();
            if let Some(background) = attr("background") {
                attrs.push(("style", format!("background:{background}")));
            }
            ("tr", attrs)
        }
        "columns" => {
            let padding = attr("padding").unwrap_or_else(|| "0".to_string());
            let mut attrs: Vec<(&str, String)> = class.map(|c| ("class", c)).into_iter().collect();
            attrs.push(("style", format!("padding: {padding};")));
            ("td", attrs)
        }
        "button" => {
            let mut attrs = vec![("href", attr("href").unwrap_or_else(|| "#".to_string()))];
            attrs.extend(class.map(|c| ("class", c)));
            attrs.push((
                "style",
                attr("style").unwrap_or_else(|| DEFAULT_BUTTON_STYLE.to_string()),
            ));
            ("a", attrs)
        }
        _ => return Ok(()),
    };

    let replacement = tree.create_element(target);
    for (name, value) in &attrs {
        tree.set_attr(replacement, name, value)?;
    }

    let content_parent = if tag == "container" {
        let tbody = tree.create_element("tbody");
        tree.append_child(replacement, tbody)?;
        tbody
    } else {
        replacement
    };
    for child in tree.take_children(node)? {
        tree.append_child(content_parent, child)?;
    }

    tree.replace_node(node, replacement)
}
