//! Structural HTML parser
//!
//! A pragmatic, bounded-effort parser for hand-authored or WYSIWYG-generated
//! email markup. It makes a single forward pass over the input and builds a
//! tree of element, text and comment nodes carrying line/column provenance.
//!
//! The parser never fails. Malformed quotes, missing `>` and mismatched
//! closing tags are tolerated, and on adversarial input the [`ParserLimits`]
//! ceilings stop the pass and the partial tree built so far is returned.
//! Termination rests on a single rule: every loop iteration calls
//! [`Parser::ensure_progress`], which force-advances the cursor when the
//! iteration did not move it.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Tags that never have children, even when not self-closed.
pub const VOID_TAGS: &[&str] = &["br", "hr", "img", "area", "base", "col", "input"];

/// Tags whose content is read verbatim up to the matching closing tag.
const RAW_TEXT_TAGS: &[&str] = &["script", "style"];

/// Termination ceilings for a single parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserLimits {
    /// Global ceiling on loop iterations, shared by every loop in the parser
    pub max_iterations: usize,
    /// Ceiling on attribute-loop iterations for one tag
    pub max_attribute_iterations: usize,
    /// Maximum element nesting depth that is parsed recursively
    pub max_depth: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_iterations: 100_000,
            max_attribute_iterations: 256,
            max_depth: 512,
        }
    }
}

/// An element node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Lower-cased tag name
    pub tag_name: String,
    /// Attributes in source order; names are lower-cased and the first
    /// occurrence of a duplicated name wins
    pub attributes: Vec<(String, String)>,
    pub children: Vec<HtmlNode>,
    pub line: usize,
    pub column: usize,
    /// Byte range of the element's outer markup in the parsed source
    pub span: Range<usize>,
    /// Whether the element was explicitly closed, self-closed or is void
    pub closed: bool,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.iter().any(|(n, _)| n == name)
    }

    pub fn is(&self, tag_name: &str) -> bool {
        self.tag_name == tag_name
    }

    /// Direct element children, skipping text and comments.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(HtmlNode::as_element)
    }

    /// Concatenated text of all descendant text nodes, space separated.
    pub fn text_content(&self) -> String {
        descendants(&self.children)
            .filter_map(|node| match node {
                HtmlNode::Text { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A node of the parsed tree. Parents exclusively own their children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HtmlNode {
    Element(Element),
    Text {
        content: String,
        line: usize,
        column: usize,
    },
    Comment {
        content: String,
        line: usize,
        column: usize,
    },
}

impl HtmlNode {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            HtmlNode::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn line(&self) -> usize {
        match self {
            HtmlNode::Element(element) => element.line,
            HtmlNode::Text { line, .. } | HtmlNode::Comment { line, .. } => *line,
        }
    }

    pub fn column(&self) -> usize {
        match self {
            HtmlNode::Element(element) => element.column,
            HtmlNode::Text { column, .. } | HtmlNode::Comment { column, .. } => *column,
        }
    }

    pub fn children(&self) -> &[HtmlNode] {
        match self {
            HtmlNode::Element(element) => &element.children,
            _ => &[],
        }
    }
}

/// Pre-order, document-order iterator over a forest of nodes.
pub struct Descendants<'a> {
    stack: Vec<std::slice::Iter<'a, HtmlNode>>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a HtmlNode;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let top = self.stack.last_mut()?;
            match top.next() {
                Some(node) => {
                    if let HtmlNode::Element(element) = node {
                        self.stack.push(element.children.iter());
                    }
                    return Some(node);
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

pub fn descendants(nodes: &[HtmlNode]) -> Descendants<'_> {
    Descendants {
        stack: vec![nodes.iter()],
    }
}

/// All elements of a forest in document order.
pub fn elements(nodes: &[HtmlNode]) -> impl Iterator<Item = &Element> {
    descendants(nodes).filter_map(HtmlNode::as_element)
}

/// Position of the parser in the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    /// Byte offset
    pub pos: usize,
    /// 1-based line
    pub line: usize,
    /// 1-based column, counted in characters
    pub column: usize,
}

impl Cursor {
    fn start() -> Self {
        Self {
            pos: 0,
            line: 1,
            column: 1,
        }
    }
}

/// Counters describing how much work a parse did and which ceilings it hit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub iterations: usize,
    pub forced_advances: usize,
    pub attribute_bailouts: usize,
    pub depth_limit_hits: usize,
    pub iteration_limit_hit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDocument {
    pub nodes: Vec<HtmlNode>,
    pub stats: ParseStats,
}

/// Reusable parser front-end holding the configured limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlParser {
    limits: ParserLimits,
}

impl HtmlParser {
    pub fn new(limits: ParserLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> ParserLimits {
        self.limits
    }

    pub fn parse(&self, html: &str) -> ParsedDocument {
        Parser::new(html, self.limits).run()
    }
}

/// Parse with default limits and return only the tree.
pub fn parse(html: &str) -> Vec<HtmlNode> {
    HtmlParser::default().parse(html).nodes
}

enum Markup {
    Comment,
    ClosingTag,
    Declaration,
    Element,
    Text,
}

struct Parser<'a> {
    input: &'a str,
    cursor: Cursor,
    limits: ParserLimits,
    stats: ParseStats,
    /// Names of the currently open elements, innermost last
    stack: Vec<String>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, limits: ParserLimits) -> Self {
        Self {
            input,
            cursor: Cursor::start(),
            limits,
            stats: ParseStats::default(),
            stack: Vec::new(),
        }
    }

    fn run(mut self) -> ParsedDocument {
        let (nodes, _) = self.parse_nodes();
        ParsedDocument {
            nodes,
            stats: self.stats,
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.cursor.pos..]
    }

    fn at_end(&self) -> bool {
        self.cursor.pos >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.cursor.pos += c.len_utf8();
        if c == '\n' {
            self.cursor.line += 1;
            self.cursor.column = 1;
        } else {
            self.cursor.column += 1;
        }
        Some(c)
    }

    /// Advance to a byte offset (which must be a char boundary), tracking lines.
    fn advance_to(&mut self, target: usize) {
        let target = target.min(self.input.len());
        while self.cursor.pos < target {
            if self.advance().is_none() {
                break;
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.advance();
        }
    }

    /// Count one loop iteration against the global ceiling.
    fn tick(&mut self) -> bool {
        if self.stats.iteration_limit_hit {
            return false;
        }
        self.stats.iterations += 1;
        if self.stats.iterations > self.limits.max_iterations {
            self.stats.iteration_limit_hit = true;
            warn!(
                limit = self.limits.max_iterations,
                offset = self.cursor.pos,
                "parser iteration ceiling reached, returning partial tree"
            );
            return false;
        }
        true
    }

    /// Force the cursor forward if the iteration that started at `before`
    /// did not consume anything.
    fn ensure_progress(&mut self, before: usize) {
        if self.cursor.pos == before && !self.at_end() {
            self.advance();
            self.stats.forced_advances += 1;
        }
    }

    fn classify(&self) -> Markup {
        let rest = self.rest();
        if rest.starts_with("<!--") {
            Markup::Comment
        } else if rest.starts_with("</") {
            Markup::ClosingTag
        } else if rest.starts_with("<!") || rest.starts_with("<?") {
            Markup::Declaration
        } else if rest.starts_with('<') && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic())
        {
            Markup::Element
        } else {
            Markup::Text
        }
    }

    /// Parse sibling nodes until EOF, the iteration ceiling, or a closing tag
    /// that ends the innermost open element. The flag reports whether that
    /// element's own closing tag was consumed.
    fn parse_nodes(&mut self) -> (Vec<HtmlNode>, bool) {
        let mut nodes = Vec::new();

        while !self.at_end() && self.tick() {
            let before = self.cursor.pos;
            self.skip_whitespace();
            if self.at_end() {
                break;
            }

            match self.classify() {
                Markup::Comment => nodes.push(self.parse_comment()),
                Markup::Declaration => self.skip_declaration(),
                Markup::ClosingTag => {
                    let start = self.cursor;
                    let name = self.read_closing_tag();
                    let closes_current = self.stack.last().is_some_and(|open| *open == name);
                    if closes_current {
                        return (nodes, true);
                    }
                    if self.stack.iter().any(|open| *open == name) {
                        // An ancestor's closer: leave it for the ancestor's loop.
                        self.cursor = start;
                        return (nodes, false);
                    }
                    // Stray closer, consumed and ignored.
                }
                Markup::Element => nodes.push(self.parse_element()),
                Markup::Text => {
                    if let Some(text) = self.parse_text() {
                        nodes.push(text);
                    }
                }
            }

            self.ensure_progress(before);
        }

        (nodes, false)
    }

    fn parse_element(&mut self) -> HtmlNode {
        let start = self.cursor;
        self.advance(); // '<'
        let tag_name = self.read_name().to_ascii_lowercase();
        let (attributes, self_closing) = self.parse_attributes();

        let (children, closed) = if self_closing || VOID_TAGS.contains(&tag_name.as_str()) {
            (Vec::new(), true)
        } else if RAW_TEXT_TAGS.contains(&tag_name.as_str()) {
            self.parse_raw_text(&tag_name)
        } else if self.stack.len() >= self.limits.max_depth {
            if self.stats.depth_limit_hits == 0 {
                warn!(
                    limit = self.limits.max_depth,
                    line = start.line,
                    "parser depth ceiling reached, flattening deeper content"
                );
            }
            self.stats.depth_limit_hits += 1;
            (Vec::new(), false)
        } else {
            self.stack.push(tag_name.clone());
            let parsed = self.parse_nodes();
            self.stack.pop();
            parsed
        };

        HtmlNode::Element(Element {
            tag_name,
            attributes,
            children,
            line: start.line,
            column: start.column,
            span: start.pos..self.cursor.pos,
            closed,
        })
    }

    fn read_name(&mut self) -> &'a str {
        let start = self.cursor.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || matches!(c, '-' | ':' | '_' | '.'))
        {
            self.advance();
        }
        &self.input[start..self.cursor.pos]
    }

    /// Parse attributes up to and including the closing `>`.
    fn parse_attributes(&mut self) -> (Vec<(String, String)>, bool) {
        let mut attributes: Vec<(String, String)> = Vec::new();
        let mut self_closing = false;
        let mut iterations = 0;

        loop {
            iterations += 1;
            if iterations > self.limits.max_attribute_iterations || !self.tick() {
                self.stats.attribute_bailouts += 1;
                self.recover_tag_end();
                break;
            }

            let before = self.cursor.pos;
            self.skip_whitespace();
            match self.peek() {
                None => break,
                Some('>') => {
                    self.advance();
                    break;
                }
                Some('/') => {
                    self.advance();
                    if self.peek() == Some('>') {
                        self.advance();
                        self_closing = true;
                        break;
                    }
                }
                // Missing '>': a new tag starts here.
                Some('<') => break,
                Some(_) => {
                    if let Some((name, value)) = self.parse_attribute()
                        && !attributes.iter().any(|(existing, _)| *existing == name)
                    {
                        attributes.push((name, value));
                    }
                }
            }

            self.ensure_progress(before);
        }

        (attributes, self_closing)
    }

    fn parse_attribute(&mut self) -> Option<(String, String)> {
        let name_start = self.cursor.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || matches!(c, '=' | '>' | '/' | '<' | '"' | '\'') {
                break;
            }
            self.advance();
        }
        let name = self.input[name_start..self.cursor.pos].to_ascii_lowercase();
        if name.is_empty() {
            return None;
        }

        let after_name = self.cursor;
        self.skip_whitespace();
        if self.peek() != Some('=') {
            self.cursor = after_name;
            return Some((name, String::new()));
        }
        self.advance();
        self.skip_whitespace();

        let value = match self.peek() {
            Some(quote @ ('"' | '\'')) => self.read_quoted(quote),
            _ => self.read_unquoted(),
        };
        Some((name, value))
    }

    fn read_quoted(&mut self, quote: char) -> String {
        self.advance();
        let value_start = self.cursor.pos;
        match self.rest().find(quote) {
            Some(offset) => {
                let value = self.input[value_start..value_start + offset].to_string();
                self.advance_to(value_start + offset + 1);
                value
            }
            // Unterminated quote: read the rest of the value as if unquoted
            // instead of swallowing the document.
            None => self.read_unquoted(),
        }
    }

    fn read_unquoted(&mut self) -> String {
        let start = self.cursor.pos;
        while matches!(self.peek(), Some(c) if !c.is_whitespace() && c != '>' && c != '<') {
            self.advance();
        }
        self.input[start..self.cursor.pos].to_string()
    }

    /// Skip to just past the next `>`, or stop at a `<` that starts new markup.
    fn recover_tag_end(&mut self) {
        match self.rest().find(['<', '>']) {
            Some(offset) => {
                let target = self.cursor.pos + offset;
                self.advance_to(target);
                if self.peek() == Some('>') {
                    self.advance();
                }
            }
            None => self.advance_to(self.input.len()),
        }
    }

    fn read_closing_tag(&mut self) -> String {
        self.advance_to(self.cursor.pos + 2);
        let name = self.read_name().to_ascii_lowercase();
        self.recover_tag_end();
        name
    }

    fn parse_comment(&mut self) -> HtmlNode {
        let start = self.cursor;
        self.advance_to(self.cursor.pos + 4);
        let body_start = self.cursor.pos;
        let (body_end, resume) = match self.rest().find("-->") {
            Some(offset) => (body_start + offset, body_start + offset + 3),
            None => (self.input.len(), self.input.len()),
        };
        self.advance_to(resume);

        HtmlNode::Comment {
            content: self.input[body_start..body_end].to_string(),
            line: start.line,
            column: start.column,
        }
    }

    fn skip_declaration(&mut self) {
        match self.rest().find('>') {
            Some(offset) => self.advance_to(self.cursor.pos + offset + 1),
            None => self.advance_to(self.input.len()),
        }
    }

    fn parse_text(&mut self) -> Option<HtmlNode> {
        let start = self.cursor;
        loop {
            match self.rest().find('<') {
                None => {
                    self.advance_to(self.input.len());
                    break;
                }
                Some(offset) => {
                    self.advance_to(self.cursor.pos + offset);
                    if !matches!(self.classify(), Markup::Text) {
                        break;
                    }
                    // A '<' that does not open markup belongs to the text.
                    self.advance();
                }
            }
        }

        let content = self.input[start.pos..self.cursor.pos].trim();
        (!content.is_empty()).then(|| HtmlNode::Text {
            content: content.to_string(),
            line: start.line,
            column: start.column,
        })
    }

    fn parse_raw_text(&mut self, tag_name: &str) -> (Vec<HtmlNode>, bool) {
        let closer = format!("</{tag_name}");
        let body = self.cursor;
        // ASCII lower-casing keeps byte offsets intact.
        let (body_end, found) = match self.rest().to_ascii_lowercase().find(&closer) {
            Some(offset) => (body.pos + offset, true),
            None => (self.input.len(), false),
        };

        let content = self.input[body.pos..body_end].trim();
        let children = if content.is_empty() {
            Vec::new()
        } else {
            vec![HtmlNode::Text {
                content: content.to_string(),
                line: body.line,
                column: body.column,
            }]
        };

        self.advance_to(body_end);
        if found {
            self.advance_to(self.cursor.pos + closer.len());
            self.recover_tag_end();
        }
        (children, found)
    }
}
