//! Performance rules: message weight, layout stability and render cost.

use std::ops::Range;

use super::markup::{find_attribute, open_tag_pattern, scan_attributes};
use super::{BuiltinRule, Category, RuleContext, RuleMeta, Severity, ValidationResult};
use crate::error::RuleResult;
use crate::parser::{Element, HtmlNode};
use crate::traversal::TraversalIndex;

/// Cell attributes that carry no styling and may be dropped when a wrapper
/// table is collapsed.
const NEUTRAL_CELL_ATTRIBUTES: &[&str] = &["width", "align", "valign"];

pub(super) fn rules() -> Vec<BuiltinRule> {
    vec![
        BuiltinRule::source(
            RuleMeta::new("html-size", "HTML size", Severity::Warning, Category::Performance)
                .description("Gmail clips messages whose HTML exceeds about 102 KB"),
            check_html_size,
        ),
        BuiltinRule::source(
            RuleMeta::new(
                "image-dimensions",
                "Image dimensions",
                Severity::Warning,
                Category::Performance,
            )
            .description("Images without explicit width and height cause layout shifts and Outlook scaling bugs"),
            check_image_dimensions,
        ),
        BuiltinRule::tree(
            RuleMeta::new("table-nesting", "Table nesting", Severity::Warning, Category::Performance)
                .description("Deeply nested tables are slow to render and fragile in Outlook"),
            check_table_nesting,
        )
        .with_fix(fix_table_nesting),
    ]
}

fn check_html_size(
    html: &str,
    ctx: &RuleContext<'_>,
    meta: &RuleMeta,
) -> RuleResult<Vec<ValidationResult>> {
    let limit = ctx.config.thresholds.gmail_clip_bytes;
    if html.len() <= limit {
        return Ok(Vec::new());
    }

    Ok(vec![
        ValidationResult::new(
            meta,
            format!(
                "HTML is {:.1} KB; Gmail clips messages larger than {:.0} KB",
                html.len() as f64 / 1024.0,
                limit as f64 / 1000.0
            ),
        )
        .suggestion("Remove unused markup and move long content behind a link"),
    ])
}

fn check_image_dimensions(
    html: &str,
    ctx: &RuleContext<'_>,
    meta: &RuleMeta,
) -> RuleResult<Vec<ValidationResult>> {
    let images = ctx.pattern(&open_tag_pattern(&["img"]))?;
    Ok(images
        .captures_iter(html)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let attributes = scan_attributes(&caps[2]);
            let missing: Vec<&str> = ["width", "height"]
                .into_iter()
                .filter(|name| find_attribute(&attributes, name).is_none())
                .collect();
            if missing.is_empty() {
                return None;
            }
            let src = find_attribute(&attributes, "src")
                .and_then(|a| a.value.clone())
                .unwrap_or_default();
            Some(
                ValidationResult::new(
                    meta,
                    format!("Image '{}' has no {} attribute", src, missing.join(" or ")),
                )
                .at_offset(html, whole.start())
                .suggestion("Set width and height attributes to the intended display size"),
            )
        })
        .collect())
}

/// Deepest chain of nested tables in a forest.
fn max_table_depth(nodes: &[HtmlNode]) -> usize {
    let mut deepest = 0;
    let mut stack: Vec<(&HtmlNode, usize)> = nodes.iter().map(|node| (node, 0)).collect();
    while let Some((node, depth)) = stack.pop() {
        let HtmlNode::Element(element) = node else {
            continue;
        };
        let depth = if element.is("table") { depth + 1 } else { depth };
        deepest = deepest.max(depth);
        stack.extend(element.children.iter().map(|child| (child, depth)));
    }
    deepest
}

fn check_table_nesting(
    _html: &str,
    ctx: &RuleContext<'_>,
    meta: &RuleMeta,
    index: &mut TraversalIndex<'_>,
) -> RuleResult<Vec<ValidationResult>> {
    let limit = ctx.config.thresholds.max_table_depth;
    let mut results = Vec::new();

    let mut stack: Vec<(&HtmlNode, usize)> =
        index.tree().iter().rev().map(|node| (node, 0)).collect();
    while let Some((node, depth)) = stack.pop() {
        let HtmlNode::Element(element) = node else {
            continue;
        };
        let depth = if element.is("table") { depth + 1 } else { depth };
        if element.is("table") && depth == limit + 1 {
            let total = depth - 1 + max_table_depth(std::slice::from_ref(node));
            results.push(
                ValidationResult::new(
                    meta,
                    format!("Tables are nested {} levels deep (maximum {})", total, limit),
                )
                .at(element.line, element.column)
                .suggestion("Flatten wrapper tables that hold a single cell"),
            );
            continue;
        }
        stack.extend(element.children.iter().rev().map(|child| (child, depth)));
    }

    Ok(results)
}

/// The only child of `element`, if it is a single element.
fn only_child(element: &Element) -> Option<&Element> {
    match element.children.as_slice() {
        [HtmlNode::Element(child)] => Some(child),
        _ => None,
    }
}

/// A table holding exactly one row with one unstyled cell that holds
/// exactly one table. Returns the inner table.
fn redundant_wrapper(table: &Element) -> Option<&Element> {
    if !table.is("table") || !table.closed {
        return None;
    }
    let mut row = only_child(table)?;
    if row.is("tbody") {
        if !row.closed {
            return None;
        }
        row = only_child(row)?;
    }
    if !row.is("tr") || !row.closed {
        return None;
    }
    let cell = only_child(row)?;
    let neutral = cell
        .attributes
        .iter()
        .all(|(name, _)| NEUTRAL_CELL_ATTRIBUTES.contains(&name.as_str()));
    if !cell.is("td") || !cell.closed || !neutral {
        return None;
    }
    only_child(cell).filter(|inner| inner.is("table"))
}

fn fix_table_nesting(html: &str, ctx: &RuleContext<'_>) -> RuleResult<String> {
    let tree = ctx.parser().parse(html).nodes;
    if max_table_depth(&tree) <= ctx.config.thresholds.max_table_depth {
        return Ok(html.to_owned());
    }

    let mut collapses: Vec<(Range<usize>, Range<usize>)> = Vec::new();
    let mut stack: Vec<&HtmlNode> = tree.iter().collect();
    while let Some(node) = stack.pop() {
        let HtmlNode::Element(element) = node else {
            continue;
        };
        if let Some(inner) = redundant_wrapper(element) {
            collapses.push((element.span.clone(), inner.span.clone()));
            continue;
        }
        stack.extend(element.children.iter());
    }

    collapses.sort_by_key(|(outer, _)| std::cmp::Reverse(outer.start));
    let mut fixed = html.to_owned();
    for (outer, inner) in collapses {
        let replacement = html[inner].to_owned();
        fixed.replace_range(outer, &replacement);
    }
    Ok(fixed)
}
