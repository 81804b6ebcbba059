//! Per-validation lookup index over a parsed tree.
//!
//! Rules that work on the tree ask the index for elements by tag, attribute
//! or semantic category. Each distinct query walks the tree once and is
//! memoised for the remainder of the validation run.

use std::collections::HashMap;

use tracing::debug;

use crate::parser::{Element, HtmlNode, elements};

/// Coarse grouping of tags by the role they play in an email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticCategory {
    Heading,
    Block,
    Table,
    Media,
    Link,
    Interactive,
    Dangerous,
    Inline,
}

impl SemanticCategory {
    pub fn tags(self) -> &'static [&'static str] {
        match self {
            SemanticCategory::Heading => &["h1", "h2", "h3", "h4", "h5", "h6"],
            SemanticCategory::Block => &[
                "div", "p", "section", "article", "header", "footer", "nav", "aside", "main",
                "figure", "figcaption", "address", "blockquote",
            ],
            SemanticCategory::Table => &["table", "thead", "tbody", "tfoot", "tr", "td", "th"],
            SemanticCategory::Media => &["img", "video", "audio", "picture", "source", "svg"],
            SemanticCategory::Link => &["a", "link"],
            SemanticCategory::Interactive => &[
                "form", "input", "button", "select", "textarea", "option", "label", "fieldset",
            ],
            SemanticCategory::Dangerous => &[
                "script", "iframe", "object", "embed", "applet", "frame", "frameset", "noscript",
            ],
            SemanticCategory::Inline => &[
                "span", "strong", "b", "em", "i", "u", "font", "small", "big", "s", "strike",
                "sub", "sup", "br",
            ],
        }
    }

    pub fn contains(self, tag_name: &str) -> bool {
        self.tags().contains(&tag_name)
    }
}

pub struct TraversalIndex<'a> {
    tree: &'a [HtmlNode],
    max_results: usize,
    by_tag: HashMap<String, Vec<&'a Element>>,
    by_attribute: HashMap<String, Vec<&'a Element>>,
    by_category: HashMap<SemanticCategory, Vec<&'a Element>>,
    truncated: bool,
}

impl<'a> TraversalIndex<'a> {
    pub fn new(tree: &'a [HtmlNode], max_results: usize) -> Self {
        Self {
            tree,
            max_results: max_results.max(1),
            by_tag: HashMap::new(),
            by_attribute: HashMap::new(),
            by_category: HashMap::new(),
            truncated: false,
        }
    }

    pub fn tree(&self) -> &'a [HtmlNode] {
        self.tree
    }

    /// Whether any query hit the result cap.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn find_by_tag(&mut self, tag_name: &str) -> Vec<&'a Element> {
        let tag_name = tag_name.to_ascii_lowercase();
        if let Some(found) = self.by_tag.get(&tag_name) {
            return found.clone();
        }
        let found = self.collect(|element| element.tag_name == tag_name);
        self.by_tag.insert(tag_name, found.clone());
        found
    }

    pub fn find_by_attribute(&mut self, name: &str) -> Vec<&'a Element> {
        let name = name.to_ascii_lowercase();
        if let Some(found) = self.by_attribute.get(&name) {
            return found.clone();
        }
        let found = self.collect(|element| element.has_attr(&name));
        self.by_attribute.insert(name, found.clone());
        found
    }

    pub fn find_by_category(&mut self, category: SemanticCategory) -> Vec<&'a Element> {
        if let Some(found) = self.by_category.get(&category) {
            return found.clone();
        }
        let found = self.collect(|element| category.contains(&element.tag_name));
        self.by_category.insert(category, found.clone());
        found
    }

    fn collect(&mut self, predicate: impl Fn(&Element) -> bool) -> Vec<&'a Element> {
        let mut found = Vec::new();
        for element in elements(self.tree).filter(|element| predicate(element)) {
            if found.len() == self.max_results {
                if !self.truncated {
                    debug!(max_results = self.max_results, "traversal query truncated");
                }
                self.truncated = true;
                break;
            }
            found.push(element);
        }
        found
    }
}
