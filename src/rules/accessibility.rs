//! Accessibility rules.

use super::markup::{find_attribute, insert_attribute, open_tag_pattern, replace_each, scan_attributes};
use super::{BuiltinRule, Category, RuleContext, RuleMeta, Severity, ValidationResult};
use crate::error::RuleResult;
use crate::traversal::TraversalIndex;

/// Attributes a layout table needs, with the values the fix inserts.
const TABLE_DEFAULTS: &[(&str, &str)] = &[
    ("role", "presentation"),
    ("cellpadding", "0"),
    ("cellspacing", "0"),
    ("border", "0"),
];

pub(super) fn rules() -> Vec<BuiltinRule> {
    vec![
        BuiltinRule::source(
            RuleMeta::new("image-alt-text", "Image alt text", Severity::Error, Category::Accessibility)
                .description("Images need alt text for screen readers and for clients that block images"),
            check_image_alt_text,
        )
        .with_fix(fix_image_alt_text),
        BuiltinRule::tree(
            RuleMeta::new("link-text", "Link text", Severity::Warning, Category::Accessibility)
                .description("Links need readable text or an image with alt text"),
            check_link_text,
        ),
        BuiltinRule::source(
            RuleMeta::new(
                "table-attributes",
                "Layout table attributes",
                Severity::Warning,
                Category::Accessibility,
            )
            .description("Layout tables should be marked role=\"presentation\" and reset spacing explicitly"),
            check_table_attributes,
        )
        .with_fix(fix_table_attributes),
        BuiltinRule::source(
            RuleMeta::new("html-lang", "Document language", Severity::Info, Category::Accessibility)
                .description("The html element should declare the content language"),
            check_html_lang,
        )
        .with_fix(fix_html_lang),
    ]
}

fn check_image_alt_text(
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
            if find_attribute(&attributes, "alt").is_some() {
                return None;
            }
            let src = find_attribute(&attributes, "src")
                .and_then(|a| a.value.clone())
                .unwrap_or_default();
            Some(
                ValidationResult::new(meta, format!("Image '{}' is missing alt text", src))
                    .at_offset(html, whole.start())
                    .suggestion("Describe the image in alt, or use alt=\"\" for decorative images"),
            )
        })
        .collect())
}

fn fix_image_alt_text(html: &str, ctx: &RuleContext<'_>) -> RuleResult<String> {
    let images = ctx.pattern(&open_tag_pattern(&["img"]))?;
    Ok(replace_each(&images, html, |caps| {
        let attributes = scan_attributes(&caps[2]);
        find_attribute(&attributes, "alt")
            .is_none()
            .then(|| insert_attribute(&caps[0], "alt=\"\""))
    }))
}

fn check_link_text(
    _html: &str,
    _ctx: &RuleContext<'_>,
    meta: &RuleMeta,
    index: &mut TraversalIndex<'_>,
) -> RuleResult<Vec<ValidationResult>> {
    let mut results = Vec::new();

    for link in index.find_by_tag("a") {
        let labelled = ["aria-label", "title"]
            .iter()
            .any(|name| link.attr(name).is_some_and(|v| !v.trim().is_empty()));
        let has_image_text = crate::parser::elements(&link.children).any(|child| {
            child.is("img") && child.attr("alt").is_some_and(|alt| !alt.trim().is_empty())
        });

        if !labelled && !has_image_text && link.text_content().trim().is_empty() {
            results.push(
                ValidationResult::new(meta, "Link has no readable text")
                    .at(link.line, link.column)
                    .suggestion("Add link text, or alt text to the linked image"),
            );
        }
    }

    Ok(results)
}

fn missing_table_attributes(text: &str) -> Vec<(&'static str, &'static str)> {
    let attributes = scan_attributes(text);
    TABLE_DEFAULTS
        .iter()
        .copied()
        .filter(|(name, _)| find_attribute(&attributes, name).is_none())
        .collect()
}

fn check_table_attributes(
    html: &str,
    ctx: &RuleContext<'_>,
    meta: &RuleMeta,
) -> RuleResult<Vec<ValidationResult>> {
    let tables = ctx.pattern(&open_tag_pattern(&["table"]))?;
    Ok(tables
        .captures_iter(html)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let missing = missing_table_attributes(&caps[2]);
            if missing.is_empty() {
                return None;
            }
            let names: Vec<_> = missing.iter().map(|(name, _)| *name).collect();
            let attributes: Vec<_> = missing
                .iter()
                .map(|(name, value)| format!("{}=\"{}\"", name, value))
                .collect();
            Some(
                ValidationResult::new(
                    meta,
                    format!("Table is missing {}", names.join(", ")),
                )
                .at_offset(html, whole.start())
                .suggestion(format!("Add {}", attributes.join(" "))),
            )
        })
        .collect())
}

fn fix_table_attributes(html: &str, ctx: &RuleContext<'_>) -> RuleResult<String> {
    let tables = ctx.pattern(&open_tag_pattern(&["table"]))?;
    Ok(replace_each(&tables, html, |caps| {
        let missing = missing_table_attributes(&caps[2]);
        (!missing.is_empty()).then(|| {
            let attributes: Vec<_> = missing
                .iter()
                .map(|(name, value)| format!("{}=\"{}\"", name, value))
                .collect();
            insert_attribute(&caps[0], &attributes.join(" "))
        })
    }))
}

fn check_html_lang(
    html: &str,
    ctx: &RuleContext<'_>,
    meta: &RuleMeta,
) -> RuleResult<Vec<ValidationResult>> {
    let roots = ctx.pattern(&open_tag_pattern(&["html"]))?;
    Ok(roots
        .captures_iter(html)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let attributes = scan_attributes(&caps[2]);
            find_attribute(&attributes, "lang").is_none().then(|| {
                ValidationResult::new(meta, "The html element has no lang attribute")
                    .at_offset(html, whole.start())
                    .suggestion("Add lang=\"en\" (or the content's language)")
            })
        })
        .collect())
}

fn fix_html_lang(html: &str, ctx: &RuleContext<'_>) -> RuleResult<String> {
    let roots = ctx.pattern(&open_tag_pattern(&["html"]))?;
    Ok(replace_each(&roots, html, |caps| {
        let attributes = scan_attributes(&caps[2]);
        find_attribute(&attributes, "lang")
            .is_none()
            .then(|| insert_attribute(&caps[0], "lang=\"en\""))
    }))
}
