//! HTML tree – a permissive, lossless DOM used by the markup and style stages.
//!
//! This is not a browser-grade HTML5 tree builder. There is no foster
//! parenting and no implied elements, and unknown tags (`<row>`,
//! `<columns>`, …) are ordinary elements. Text and attribute values are kept
//! raw, with no entity decoding, so serializing an unmodified tree gives back
//! the input up to attribute quoting and whitespace inside tags. Attribute
//! values are always written double-quoted, with `"` escaped as `&quot;`.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]; moving a node
//! re-links it without copying its subtree.

use thiserror::Error;

/// Index of a node in its [`Document`].
pub type NodeId = usize;

/// Elements that never have children or an end tag.
const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose content is raw text up to the matching end tag.
const RAW_TEXT_ELEMENTS: [&str; 2] = ["style", "script"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MarkupError {
    #[error("unterminated tag starting at byte {0}")]
    UnterminatedTag(usize),

    #[error("unterminated comment starting at byte {0}")]
    UnterminatedComment(usize),

    #[error("node {0} does not exist")]
    InvalidNode(NodeId),

    #[error("node {0} has no parent")]
    Detached(NodeId),

    #[error("node {0} is not an element")]
    NotAnElement(NodeId),
}

// ---------------------------------------------------------------------------
// Tree interface
// ---------------------------------------------------------------------------

/// The operations the markup rewrite needs from an HTML tree.
pub trait MarkupTree {
    type Node: Copy;

    /// Elements named `tag`, in document order. Detached nodes are skipped.
    fn query_by_tag(&self, tag: &str) -> Vec<Self::Node>;

    fn attr(&self, node: Self::Node, name: &str) -> Option<&str>;

    fn set_attr(&mut self, node: Self::Node, name: &str, value: &str) -> Result<(), MarkupError>;

    /// A new, detached element.
    fn create_element(&mut self, tag: &str) -> Self::Node;

    /// Move `child` to the end of `parent`'s children.
    fn append_child(&mut self, parent: Self::Node, child: Self::Node) -> Result<(), MarkupError>;

    /// Detach and return all children of `node`, in order.
    fn take_children(&mut self, node: Self::Node) -> Result<Vec<Self::Node>, MarkupError>;

    /// Put `new` where `old` is; `old` becomes detached.
    fn replace_node(&mut self, old: Self::Node, new: Self::Node) -> Result<(), MarkupError>;

    fn serialize(&self) -> String;
}

// ---------------------------------------------------------------------------
// DOM types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    /// `None` for valueless attributes such as `disabled`.
    pub value: Option<String>,
}

/// An element node's tag and attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Lower-cased tag name.
    pub name: String,
    /// Attributes in source order. Names keep their original case.
    pub attrs: Vec<Attribute>,
    /// Written as `<tag />` in the source.
    pub self_closing: bool,
}

impl Element {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            attrs: Vec::new(),
            self_closing: false,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .map(|a| a.value.as_deref().unwrap_or(""))
    }

    pub fn set_attr(&mut self, name: &str, value: &str) {
        match self
            .attrs
            .iter_mut()
            .find(|a| a.name.eq_ignore_ascii_case(name))
        {
            Some(a) => a.value = Some(value.to_string()),
            None => self.attrs.push(Attribute {
                name: name.to_string(),
                value: Some(value.to_string()),
            }),
        }
    }

    pub fn classes(&self) -> Vec<&str> {
        self.attr("class")
            .map(|c| c.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    pub fn is_void(&self) -> bool {
        VOID_ELEMENTS.contains(&self.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeData {
    Document,
    Element(Element),
    /// Raw text, entities untouched.
    Text(String),
    /// Comment body without the `<!--`/`-->` delimiters.
    Comment(String),
    /// `<!DOCTYPE …>` or `<?…?>`, verbatim.
    Declaration(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    data: NodeData,
}

/// An HTML document or fragment.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            nodes: vec![Node {
                parent: None,
                children: Vec::new(),
                data: NodeData::Document,
            }],
        }
    }
}

impl Document {
    pub const ROOT: NodeId = 0;

    /// Parse an HTML document or fragment.
    pub fn parse(html: &str) -> Result<Self, MarkupError> {
        Parser::new(html).run()
    }

    pub fn data(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id).map(|n| &n.data)
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match self.data(id)? {
            NodeData::Element(e) => Some(e),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match self.nodes.get_mut(id).map(|n| &mut n.data)? {
            NodeData::Element(e) => Some(e),
            _ => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id)?.parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Attached elements in document order.
    pub fn elements(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![Self::ROOT];
        while let Some(id) = stack.pop() {
            if matches!(self.nodes[id].data, NodeData::Element(_)) {
                out.push(id);
            }
            stack.extend(self.nodes[id].children.iter().rev());
        }
        out
    }

    /// Concatenated text of a node's direct text children.
    pub fn text(&self, id: NodeId) -> String {
        self.children(id)
            .iter()
            .filter_map(|&c| match &self.nodes[c].data {
                NodeData::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        self.nodes.push(Node {
            parent: None,
            children: Vec::new(),
            data,
        });
        self.nodes.len() - 1
    }

    fn check(&self, id: NodeId) -> Result<(), MarkupError> {
        if id < self.nodes.len() {
            Ok(())
        } else {
            Err(MarkupError::InvalidNode(id))
        }
    }

    fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id].parent.take() {
            self.nodes[parent].children.retain(|&c| c != id);
        }
    }

    fn serialize_node(&self, id: NodeId, out: &mut String) {
        match &self.nodes[id].data {
            NodeData::Document => {
                for &child in &self.nodes[id].children {
                    self.serialize_node(child, out);
                }
            }
            NodeData::Element(e) => {
                out.push('<');
                out.push_str(&e.name);
                for attr in &e.attrs {
                    out.push(' ');
                    out.push_str(&attr.name);
                    if let Some(value) = &attr.value {
                        out.push_str("=\"");
                        out.push_str(&value.replace('"', "&quot;"));
                        out.push('"');
                    }
                }
                if e.self_closing && self.nodes[id].children.is_empty() {
                    out.push_str(" />");
                    return;
                }
                out.push('>');
                if e.is_void() && self.nodes[id].children.is_empty() {
                    return;
                }
                for &child in &self.nodes[id].children {
                    self.serialize_node(child, out);
                }
                out.push_str("</");
                out.push_str(&e.name);
                out.push('>');
            }
            NodeData::Text(t) => out.push_str(t),
            NodeData::Comment(c) => {
                out.push_str("<!--");
                out.push_str(c);
                out.push_str("-->");
            }
            NodeData::Declaration(d) => out.push_str(d),
        }
    }
}

impl MarkupTree for Document {
    type Node = NodeId;

    fn query_by_tag(&self, tag: &str) -> Vec<NodeId> {
        self.elements()
            .into_iter()
            .filter(|&id| {
                self.element(id)
                    .is_some_and(|e| e.name.eq_ignore_ascii_case(tag))
            })
            .collect()
    }

    fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        self.element(node)?.attr(name)
    }

    fn set_attr(&mut self, node: NodeId, name: &str, value: &str) -> Result<(), MarkupError> {
        self.element_mut(node)
            .ok_or(MarkupError::NotAnElement(node))?
            .set_attr(name, value);
        Ok(())
    }

    fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(NodeData::Element(Element::new(tag)))
    }

    fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), MarkupError> {
        self.check(parent)?;
        self.check(child)?;
        self.detach(child);
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
        Ok(())
    }

    fn take_children(&mut self, node: NodeId) -> Result<Vec<NodeId>, MarkupError> {
        self.check(node)?;
        let children = std::mem::take(&mut self.nodes[node].children);
        for &child in &children {
            self.nodes[child].parent = None;
        }
        Ok(children)
    }

    fn replace_node(&mut self, old: NodeId, new: NodeId) -> Result<(), MarkupError> {
        self.check(old)?;
        self.check(new)?;
        let parent = self.nodes[old].parent.ok_or(MarkupError::Detached(old))?;
        self.detach(new);
        let slot = self.nodes[parent]
            .children
            .iter()
            .position(|&c| c == old)
            .ok_or(MarkupError::Detached(old))?;
        self.nodes[parent].children[slot] = new;
        self.nodes[new].parent = Some(parent);
        self.nodes[old].parent = None;
        Ok(())
    }

    fn serialize(&self) -> String {
        let mut out = String::new();
        self.serialize_node(Self::ROOT, &mut out);
        out
    }
}

// ---------------------------------------------------------------------------
// Parser – tag soup over a stack of open elements
// ---------------------------------------------------------------------------

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    doc: Document,
    open: Vec<NodeId>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            doc: Document::default(),
            open: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Document, MarkupError> {
        while !self.eof() {
            if self.starts_with("<!--") {
                self.parse_comment()?;
            } else if self.starts_with("</") && self.peek_is_alpha(2) {
                self.parse_end_tag()?;
            } else if self.starts_with("<!") || self.starts_with("<?") {
                self.parse_declaration()?;
            } else if self.starts_with("<") && self.peek_is_alpha(1) {
                self.parse_start_tag()?;
            } else {
                self.parse_text();
            }
        }
        Ok(self.doc)
    }

    fn current_parent(&self) -> NodeId {
        self.open.last().copied().unwrap_or(Document::ROOT)
    }

    fn attach(&mut self, data: NodeData) -> NodeId {
        let id = self.doc.push(data);
        let parent = self.current_parent();
        self.doc.nodes[id].parent = Some(parent);
        self.doc.nodes[parent].children.push(id);
        id
    }

    fn parse_text(&mut self) {
        let start = self.pos;
        // The first character may be a '<' that does not open markup.
        self.advance();
        while !self.eof() && !self.at_markup() {
            self.advance();
        }
        let text = self.input[start..self.pos].to_string();
        self.attach(NodeData::Text(text));
    }

    fn parse_comment(&mut self) -> Result<(), MarkupError> {
        let start = self.pos;
        let body_start = start + 4;
        let end = self.input[body_start..]
            .find("-->")
            .ok_or(MarkupError::UnterminatedComment(start))?;
        let body = self.input[body_start..body_start + end].to_string();
        self.pos = body_start + end + 3;
        self.attach(NodeData::Comment(body));
        Ok(())
    }

    fn parse_declaration(&mut self) -> Result<(), MarkupError> {
        let start = self.pos;
        let end = self.input[start..]
            .find('>')
            .ok_or(MarkupError::UnterminatedTag(start))?;
        self.pos = start + end + 1;
        let raw = self.input[start..self.pos].to_string();
        self.attach(NodeData::Declaration(raw));
        Ok(())
    }

    fn parse_start_tag(&mut self) -> Result<(), MarkupError> {
        let start = self.pos;
        self.advance(); // '<'
        let mut element = Element::new(self.take_while(|c| !c.is_whitespace() && c != '/' && c != '>'));

        loop {
            self.skip_whitespace();
            if self.eof() {
                return Err(MarkupError::UnterminatedTag(start));
            }
            if self.starts_with(">") {
                self.advance();
                break;
            }
            if self.starts_with("/>") {
                self.pos += 2;
                element.self_closing = true;
                break;
            }
            if self.starts_with("/") {
                self.advance();
                continue;
            }
            let attr = self.parse_attribute(start)?;
            element.attrs.push(attr);
        }

        let name = element.name.clone();
        let leaf = element.self_closing || element.is_void();
        let id = self.attach(NodeData::Element(element));
        if leaf {
            return Ok(());
        }
        if RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
            self.parse_raw_text(id, &name);
            return Ok(());
        }
        self.open.push(id);
        Ok(())
    }

    fn parse_attribute(&mut self, tag_start: usize) -> Result<Attribute, MarkupError> {
        let mut name = self
            .take_while(|c| !c.is_whitespace() && c != '=' && c != '>' && c != '/')
            .to_string();
        if name.is_empty() {
            // A stray '=' cannot start a name; keep it so nothing is lost.
            self.advance();
            name = "=".to_string();
        }
        self.skip_whitespace();
        if !self.starts_with("=") {
            return Ok(Attribute { name, value: None });
        }
        self.advance();
        self.skip_whitespace();

        let value = match self.current_char() {
            Some(q @ ('"' | '\'')) => {
                self.advance();
                let end = self.input[self.pos..]
                    .find(q)
                    .ok_or(MarkupError::UnterminatedTag(tag_start))?;
                let value = self.input[self.pos..self.pos + end].to_string();
                self.pos += end + 1;
                value
            }
            _ => self.take_while(|c| !c.is_whitespace() && c != '>').to_string(),
        };
        Ok(Attribute {
            name,
            value: Some(value),
        })
    }

    /// Everything up to `</name` becomes a single text child.
    fn parse_raw_text(&mut self, id: NodeId, name: &str) {
        let rest = &self.input[self.pos..];
        let closing = format!("</{name}");
        let end = rest
            .to_ascii_lowercase()
            .find(&closing)
            .unwrap_or(rest.len());
        if end > 0 {
            let text = rest[..end].to_string();
            let text_id = self.doc.push(NodeData::Text(text));
            self.doc.nodes[text_id].parent = Some(id);
            self.doc.nodes[id].children.push(text_id);
        }
        self.pos += end;
        if !self.eof() {
            match self.input[self.pos..].find('>') {
                Some(gt) => self.pos += gt + 1,
                None => self.pos = self.input.len(),
            }
        }
    }

    fn parse_end_tag(&mut self) -> Result<(), MarkupError> {
        let start = self.pos;
        self.pos += 2; // '</'
        let name = self
            .take_while(|c| !c.is_whitespace() && c != '>')
            .to_ascii_lowercase();
        let gt = self.input[self.pos..]
            .find('>')
            .ok_or(MarkupError::UnterminatedTag(start))?;
        self.pos += gt + 1;

        // Close the nearest open element with this name; a stray end tag
        // with no matching open element is dropped.
        let matching = self.open.iter().rposition(|&id| {
            self.doc
                .element(id)
                .is_some_and(|e| e.name == name)
        });
        match matching {
            Some(index) => self.open.truncate(index),
            None => log::debug!("dropping stray </{name}> at byte {start}"),
        }
        Ok(())
    }

    fn at_markup(&self) -> bool {
        self.starts_with("<!")
            || self.starts_with("<?")
            || (self.starts_with("</") && self.peek_is_alpha(2))
            || (self.starts_with("<") && self.peek_is_alpha(1))
    }

    fn peek_is_alpha(&self, offset: usize) -> bool {
        self.input[self.pos..]
            .chars()
            .nth(offset)
            .is_some_and(|c| c.is_ascii_alphabetic())
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.current_char() {
            if !pred(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.input[start..self.pos]
    }

    fn skip_whitespace(&mut self) {
        self.take_while(char::is_whitespace);
    }

    fn starts_with(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }

    fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn current_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(c) = self.current_char() {
            self.pos += c.len_utf8();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(html: &str) -> String {
        Document::parse(html).unwrap().serialize()
    }

    #[test]
    fn unmodified_tree_round_trips() {
        let samples = [
            "<!DOCTYPE html><html><head><title>T</title></head><body><p class=\"a b\">Hi &amp; bye</p></body></html>",
            "<table><tr><td>1</td></tr></table>",
            "<p>a<br>b<img src=\"x.png\"></p>",
            "<!-- note --><div data-x=\"1\" hidden>text</div>",
            "<style>p > a { color: red; }</style><p>x</p>",
            "a < b and c > d",
            "<p title=\"say &quot;hi&quot;\">q</p>",
        ];
        for s in samples {
            assert_eq!(round_trip(s), s);
        }
    }

    #[test]
    fn attribute_values_are_always_double_quoted() {
        assert_eq!(
            round_trip("<p title='say \"hi\"'>q</p>"),
            "<p title=\"say &quot;hi&quot;\">q</p>"
        );

        let mut doc = Document::parse("<p>x</p>").unwrap();
        let p = doc.query_by_tag("p")[0];
        doc.set_attr(p, "style", r#"font-family: "Helvetica Neue", 'Arial';"#).unwrap();
        let html = doc.serialize();
        assert_eq!(
            html,
            "<p style=\"font-family: &quot;Helvetica Neue&quot;, 'Arial';\">x</p>"
        );
        let reparsed = Document::parse(&html).unwrap();
        let p = reparsed.query_by_tag("p")[0];
        assert_eq!(
            reparsed.attr(p, "style"),
            Some("font-family: &quot;Helvetica Neue&quot;, 'Arial';")
        );
    }

    #[test]
    fn custom_tags_are_elements() {
        let doc = Document::parse("<container class=\"c\"><row><columns>x</columns></row></container>").unwrap();
        let container = doc.query_by_tag("container");
        assert_eq!(container.len(), 1);
        assert_eq!(doc.attr(container[0], "class"), Some("c"));
        let columns = doc.query_by_tag("columns")[0];
        let row = doc.parent(columns).unwrap();
        assert_eq!(doc.element(row).unwrap().name, "row");
    }

    #[test]
    fn td_outside_table_is_kept() {
        let doc = Document::parse("<row><td>x</td></row>").unwrap();
        assert_eq!(doc.query_by_tag("td").len(), 1);
    }

    #[test]
    fn tag_names_are_lowercased_but_attrs_keep_case() {
        let doc = Document::parse("<DIV dataX=\"1\">y</DIV>").unwrap();
        assert_eq!(doc.serialize(), "<div dataX=\"1\">y</div>");
    }

    #[test]
    fn stray_end_tags_are_dropped_and_open_tags_closed() {
        assert_eq!(round_trip("<div>a</span>b"), "<div>ab</div>");
        assert_eq!(round_trip("<div><p>a</div>b"), "<div><p>a</p></div>b");
    }

    #[test]
    fn self_closing_and_unquoted_attrs() {
        assert_eq!(round_trip("<br/><a href=x>y</a>"), "<br /><a href=\"x\">y</a>");
    }

    #[test]
    fn raw_text_is_not_parsed() {
        let doc = Document::parse("<style>a<b{}</style>").unwrap();
        let style = doc.query_by_tag("style")[0];
        assert_eq!(doc.text(style), "a<b{}");
        assert!(doc.query_by_tag("b").is_empty());
    }

    #[test]
    fn unterminated_markup_is_an_error() {
        assert_eq!(
            Document::parse("<p>x<a href=\"y").unwrap_err(),
            MarkupError::UnterminatedTag(4)
        );
        assert_eq!(
            Document::parse("x<!-- open").unwrap_err(),
            MarkupError::UnterminatedComment(1)
        );
    }

    #[test]
    fn replace_moves_children() {
        let mut doc = Document::parse("<x><b>1</b><i>2</i></x>").unwrap();
        let x = doc.query_by_tag("x")[0];
        let b = doc.query_by_tag("b")[0];
        let y = doc.create_element("y");
        for child in doc.take_children(x).unwrap() {
            doc.append_child(y, child).unwrap();
        }
        doc.replace_node(x, y).unwrap();
        assert_eq!(doc.serialize(), "<y><b>1</b><i>2</i></y>");
        assert_eq!(doc.parent(b), Some(y));
        assert!(doc.query_by_tag("x").is_empty());
        assert_eq!(doc.replace_node(x, y), Err(MarkupError::Detached(x)));
    }
}
