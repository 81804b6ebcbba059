//! Best-practice rules.

use super::markup::{
    OPEN_TAG, RawAttribute, dedupe_declarations, find_attribute, insert_attribute,
    open_tag_pattern, parse_style, render_attributes, render_style, replace_each, scan_attributes,
};
use super::{BuiltinRule, Category, RuleContext, RuleMeta, Severity, ValidationResult};
use crate::error::RuleResult;

const EMPTY_CANDIDATES: &[&str] = &[
    "span", "strong", "b", "em", "i", "u", "font", "small", "big", "s", "strike", "sub", "sup",
];

pub(super) fn rules() -> Vec<BuiltinRule> {
    vec![
        BuiltinRule::source(
            RuleMeta::new("link-attributes", "Link attributes", Severity::Warning, Category::BestPractice)
                .description("Links need an href, and links opening a new window need rel=\"noopener noreferrer\""),
            check_link_attributes,
        )
        .with_fix(fix_link_attributes),
        BuiltinRule::source(
            RuleMeta::new("image-attributes", "Image attributes", Severity::Info, Category::BestPractice)
                .description("Linked images get a blue border in some clients unless border=\"0\" is set"),
            check_image_attributes,
        )
        .with_fix(fix_image_attributes),
        BuiltinRule::source(
            RuleMeta::new("duplicate-styles", "Duplicate styles", Severity::Warning, Category::BestPractice)
                .description("Repeated style attributes or properties are resolved differently by each client"),
            check_duplicate_styles,
        )
        .with_fix(fix_duplicate_styles),
        BuiltinRule::source(
            RuleMeta::new("empty-elements", "Empty elements", Severity::Info, Category::BestPractice)
                .description("Empty inline elements add weight without content"),
            check_empty_elements,
        )
        .with_fix(fix_empty_elements),
        BuiltinRule::source(
            RuleMeta::new("missing-doctype", "Missing doctype", Severity::Info, Category::BestPractice)
                .description("Full documents should start with a doctype to avoid quirks mode"),
            check_missing_doctype,
        )
        .with_fix(fix_missing_doctype),
    ]
}

/// Attributes a link still needs, as `name="value"` text.
fn missing_link_attributes(attributes: &[RawAttribute]) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if find_attribute(attributes, "href").is_none() {
        missing.push("href=\"#\"");
    }
    let new_window = find_attribute(attributes, "target")
        .and_then(|target| target.value.as_deref())
        .is_some_and(|target| target.eq_ignore_ascii_case("_blank"));
    if new_window && find_attribute(attributes, "rel").is_none() {
        missing.push("rel=\"noopener noreferrer\"");
    }
    missing
}

fn check_link_attributes(
    html: &str,
    ctx: &RuleContext<'_>,
    meta: &RuleMeta,
) -> RuleResult<Vec<ValidationResult>> {
    let links = ctx.pattern(&open_tag_pattern(&["a"]))?;
    let mut results = Vec::new();

    for caps in links.captures_iter(html) {
        let Some(whole) = caps.get(0) else { continue };
        for missing in missing_link_attributes(&scan_attributes(&caps[2])) {
            let message = if missing.starts_with("href") {
                "Link has no href"
            } else {
                "Link opens a new window without rel=\"noopener noreferrer\""
            };
            results.push(
                ValidationResult::new(meta, message)
                    .at_offset(html, whole.start())
                    .suggestion(format!("Add {}", missing)),
            );
        }
    }

    Ok(results)
}

fn fix_link_attributes(html: &str, ctx: &RuleContext<'_>) -> RuleResult<String> {
    let links = ctx.pattern(&open_tag_pattern(&["a"]))?;
    Ok(replace_each(&links, html, |caps| {
        let missing = missing_link_attributes(&scan_attributes(&caps[2]));
        (!missing.is_empty()).then(|| insert_attribute(&caps[0], &missing.join(" ")))
    }))
}

fn check_image_attributes(
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
            find_attribute(&attributes, "border").is_none().then(|| {
                ValidationResult::new(meta, "Image has no border attribute")
                    .at_offset(html, whole.start())
                    .suggestion("Add border=\"0\"")
            })
        })
        .collect())
}

fn fix_image_attributes(html: &str, ctx: &RuleContext<'_>) -> RuleResult<String> {
    let images = ctx.pattern(&open_tag_pattern(&["img"]))?;
    Ok(replace_each(&images, html, |caps| {
        let attributes = scan_attributes(&caps[2]);
        find_attribute(&attributes, "border")
            .is_none()
            .then(|| insert_attribute(&caps[0], "border=\"0\""))
    }))
}

enum StyleProblem {
    RepeatedAttribute(usize),
    RepeatedProperty(String),
}

fn style_problem(attributes: &[RawAttribute]) -> Option<StyleProblem> {
    let styles: Vec<&RawAttribute> = attributes.iter().filter(|a| a.is("style")).collect();
    if styles.len() > 1 {
        return Some(StyleProblem::RepeatedAttribute(styles.len()));
    }
    let declarations = parse_style(styles.first()?.value.as_deref().unwrap_or_default());
    declarations
        .iter()
        .enumerate()
        .find(|(i, (property, _))| declarations[..*i].iter().any(|(p, _)| p == property))
        .map(|(_, (property, _))| StyleProblem::RepeatedProperty(property.clone()))
}

fn check_duplicate_styles(
    html: &str,
    ctx: &RuleContext<'_>,
    meta: &RuleMeta,
) -> RuleResult<Vec<ValidationResult>> {
    let tags = ctx.pattern(OPEN_TAG)?;
    Ok(tags
        .captures_iter(html)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let tag = caps[1].to_ascii_lowercase();
            let message = match style_problem(&scan_attributes(&caps[2]))? {
                StyleProblem::RepeatedAttribute(count) => {
                    format!("<{}> has {} style attributes", tag, count)
                }
                StyleProblem::RepeatedProperty(property) => {
                    format!("Style on <{}> sets '{}' more than once", tag, property)
                }
            };
            Some(
                ValidationResult::new(meta, message)
                    .at_offset(html, whole.start())
                    .suggestion("Merge declarations into a single style attribute"),
            )
        })
        .collect())
}

fn fix_duplicate_styles(html: &str, ctx: &RuleContext<'_>) -> RuleResult<String> {
    let tags = ctx.pattern(OPEN_TAG)?;
    Ok(replace_each(&tags, html, |caps| {
        let attributes = scan_attributes(&caps[2]);
        style_problem(&attributes)?;

        let declarations = attributes
            .iter()
            .filter(|a| a.is("style"))
            .flat_map(|a| parse_style(a.value.as_deref().unwrap_or_default()));
        let merged = render_style(&dedupe_declarations(declarations));

        let mut rebuilt = Vec::with_capacity(attributes.len());
        let mut placed = false;
        for attribute in &attributes {
            if !attribute.is("style") {
                rebuilt.push(attribute.clone());
            } else if !placed {
                rebuilt.push(RawAttribute::new("style", Some(merged.clone())));
                placed = true;
            }
        }

        let slash = if caps[3].is_empty() { "" } else { " /" };
        Some(format!("<{}{}{}>", &caps[1], render_attributes(&rebuilt), slash))
    }))
}

fn empty_element_pattern() -> String {
    let names = EMPTY_CANDIDATES.join("|");
    format!(r"<({names})\b[^<>]*>\s*</({names})\s*>")
}

fn check_empty_elements(
    html: &str,
    ctx: &RuleContext<'_>,
    meta: &RuleMeta,
) -> RuleResult<Vec<ValidationResult>> {
    let re = ctx.pattern(&empty_element_pattern())?;
    Ok(re
        .captures_iter(html)
        .filter(|caps| caps[1].eq_ignore_ascii_case(&caps[2]))
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(
                ValidationResult::new(
                    meta,
                    format!("Empty <{}> element", caps[1].to_ascii_lowercase()),
                )
                .at_offset(html, whole.start())
                .suggestion("Remove the element"),
            )
        })
        .collect())
}

fn fix_empty_elements(html: &str, ctx: &RuleContext<'_>) -> RuleResult<String> {
    let re = ctx.pattern(&empty_element_pattern())?;
    Ok(replace_each(&re, html, |caps| {
        caps[1].eq_ignore_ascii_case(&caps[2]).then(String::new)
    }))
}

fn needs_doctype(html: &str, ctx: &RuleContext<'_>) -> RuleResult<Option<usize>> {
    let root = ctx.pattern(r"<html\b")?;
    let doctype = ctx.pattern(r"<!doctype\b")?;
    Ok(root
        .find(html)
        .filter(|_| !doctype.is_match(html))
        .map(|found| found.start()))
}

fn check_missing_doctype(
    html: &str,
    ctx: &RuleContext<'_>,
    meta: &RuleMeta,
) -> RuleResult<Vec<ValidationResult>> {
    Ok(needs_doctype(html, ctx)?
        .map(|offset| {
            ValidationResult::new(meta, "Document has no doctype")
                .at_offset(html, offset)
                .suggestion("Start the document with <!DOCTYPE html>")
        })
        .into_iter()
        .collect())
}

fn fix_missing_doctype(html: &str, ctx: &RuleContext<'_>) -> RuleResult<String> {
    Ok(match needs_doctype(html, ctx)? {
        Some(_) => format!("<!DOCTYPE html>\n{}", html),
        None => html.to_owned(),
    })
}
