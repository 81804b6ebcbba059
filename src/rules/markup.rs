//! Text-level helpers shared by the built-in rules: position lookup, tag
//! patterns, a lenient attribute scanner and inline-style merging.

use regex::{Captures, Regex};

/// Any opening or self-closing tag. Groups: name, attribute text, self-close slash.
pub const OPEN_TAG: &str = r"<([a-zA-Z][a-zA-Z0-9]*)\b([^<>]*?)(/?)>";

/// 1-based line and column of a byte offset.
pub fn line_col(html: &str, offset: usize) -> (usize, usize) {
    let mut offset = offset.min(html.len());
    while !html.is_char_boundary(offset) {
        offset -= 1;
    }
    let before = &html[..offset];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    let column = before[line_start..].chars().count() + 1;
    (line, column)
}

/// Opening-tag pattern restricted to the given names.
pub fn open_tag_pattern(tags: &[&str]) -> String {
    format!(r"<({})\b([^<>]*?)(/?)>", tags.join("|"))
}

pub fn close_tag_pattern(tags: &[&str]) -> String {
    format!(r"</({})\s*>", tags.join("|"))
}

/// Replace every match for which `f` returns a value, leaving the rest untouched.
pub fn replace_each(
    re: &Regex,
    html: &str,
    mut f: impl FnMut(&Captures<'_>) -> Option<String>,
) -> String {
    re.replace_all(html, |caps: &Captures<'_>| {
        f(caps).unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

/// One attribute as written in the source, including its defects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    /// Name as written
    pub name: String,
    pub value: Option<String>,
    pub quote: Option<char>,
    /// Whitespace on either side of `=`
    pub spaced_equals: bool,
    /// Opening quote without a matching closing quote
    pub unterminated: bool,
}

impl RawAttribute {
    pub fn new(name: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            value: value.map(Into::into),
            quote: Some('"'),
            spaced_equals: false,
            unterminated: false,
        }
    }

    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub fn is_unquoted(&self) -> bool {
        self.value.is_some() && self.quote.is_none()
    }

    pub fn is_malformed(&self) -> bool {
        self.is_unquoted() || self.spaced_equals || self.unterminated
    }

    /// Canonical form: lower-case name, double-quoted value.
    pub fn render(&self) -> String {
        let name = self.name.to_ascii_lowercase();
        match &self.value {
            None => name,
            Some(value) if value.contains('"') && !value.contains('\'') => {
                format!("{}='{}'", name, value)
            }
            Some(value) => format!("{}=\"{}\"", name, value.replace('"', "&quot;")),
        }
    }
}

/// Scan the attribute text of an opening tag. Never fails; stray characters
/// are skipped.
pub fn scan_attributes(text: &str) -> Vec<RawAttribute> {
    let mut attributes = Vec::new();
    let mut rest = text;

    loop {
        rest = rest.trim_start();
        let Some(first) = rest.chars().next() else {
            break;
        };

        let name_len = rest
            .find(|c: char| c.is_whitespace() || matches!(c, '=' | '"' | '\'' | '/'))
            .unwrap_or(rest.len());
        if name_len == 0 {
            rest = &rest[first.len_utf8()..];
            continue;
        }
        let name = &rest[..name_len];
        rest = &rest[name_len..];

        let after_eq_lookahead = rest.trim_start();
        if !after_eq_lookahead.starts_with('=') {
            attributes.push(RawAttribute {
                name: name.to_string(),
                value: None,
                quote: None,
                spaced_equals: false,
                unterminated: false,
            });
            continue;
        }

        let spaced_before = after_eq_lookahead.len() != rest.len();
        let after_eq = &after_eq_lookahead[1..];
        rest = after_eq.trim_start();
        let spaced_after = rest.len() != after_eq.len();

        let mut quote = None;
        let mut unterminated = false;
        let value = match rest.chars().next() {
            Some(q @ ('"' | '\'')) => {
                quote = Some(q);
                let inner = &rest[1..];
                match inner.find(q) {
                    Some(end) => {
                        rest = &inner[end + 1..];
                        inner[..end].to_string()
                    }
                    None => {
                        unterminated = true;
                        let end = inner.find(char::is_whitespace).unwrap_or(inner.len());
                        rest = &inner[end..];
                        inner[..end].to_string()
                    }
                }
            }
            _ => {
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                let value = rest[..end].to_string();
                rest = &rest[end..];
                value
            }
        };

        attributes.push(RawAttribute {
            name: name.to_string(),
            value: Some(value),
            quote,
            spaced_equals: spaced_before || spaced_after,
            unterminated,
        });
    }

    attributes
}

/// Render attributes with a leading space each, ready to follow a tag name.
pub fn render_attributes(attributes: &[RawAttribute]) -> String {
    attributes
        .iter()
        .map(|attribute| format!(" {}", attribute.render()))
        .collect()
}

pub fn find_attribute<'a>(attributes: &'a [RawAttribute], name: &str) -> Option<&'a RawAttribute> {
    attributes.iter().find(|attribute| attribute.is(name))
}

/// Insert attribute text into an opening tag, before its `>` or `/>`.
pub fn insert_attribute(tag: &str, attribute: &str) -> String {
    if let Some(head) = tag.strip_suffix("/>") {
        format!("{} {} />", head.trim_end(), attribute)
    } else if let Some(head) = tag.strip_suffix('>') {
        format!("{} {}>", head.trim_end(), attribute)
    } else {
        format!("{} {}", tag, attribute)
    }
}

/// Split a `style` value into lower-cased properties and trimmed values.
pub fn parse_style(style: &str) -> Vec<(String, String)> {
    style
        .split(';')
        .filter_map(|declaration| {
            let (property, value) = declaration.split_once(':')?;
            let property = property.trim().to_ascii_lowercase();
            let value = value.trim();
            (!property.is_empty() && !value.is_empty()).then(|| (property, value.to_string()))
        })
        .collect()
}

/// Collapse repeated properties: first position, last value.
pub fn dedupe_declarations(
    declarations: impl IntoIterator<Item = (String, String)>,
) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = Vec::new();
    for (property, value) in declarations {
        match merged.iter_mut().find(|(existing, _)| *existing == property) {
            Some(slot) => slot.1 = value,
            None => merged.push((property, value)),
        }
    }
    merged
}

pub fn render_style(declarations: &[(String, String)]) -> String {
    declarations
        .iter()
        .map(|(property, value)| format!("{}:{};", property, value))
        .collect()
}

/// Merge two style values; properties from `overrides` win.
pub fn merge_styles(base: &str, overrides: &str) -> String {
    let combined = parse_style(base).into_iter().chain(parse_style(overrides));
    render_style(&dedupe_declarations(combined))
}

/// Rebuild attribute text with `base` merged under any existing style.
pub fn with_base_style(text: &str, base: &str) -> String {
    let mut attributes = scan_attributes(text);
    let existing: Vec<String> = attributes
        .iter()
        .filter(|attribute| attribute.is("style"))
        .filter_map(|attribute| attribute.value.clone())
        .collect();
    attributes.retain(|attribute| !attribute.is("style"));

    let merged = merge_styles(base, &existing.join(";"));
    attributes.push(RawAttribute::new("style", Some(merged)));
    render_attributes(&attributes)
}
