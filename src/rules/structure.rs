//! Structure rules: tags and attributes that email clients strip, mangle or
//! render inconsistently.

use super::markup::{
    OPEN_TAG, RawAttribute, close_tag_pattern, open_tag_pattern, render_attributes,
    replace_each, scan_attributes, with_base_style,
};
use super::{BuiltinRule, Category, RuleContext, RuleMeta, Severity, ValidationResult};
use crate::cache::PatternFlags;
use crate::error::RuleResult;
use crate::parser::VOID_TAGS;

pub const DANGEROUS_TAGS: &[&str] = &[
    "script", "iframe", "object", "embed", "applet", "form", "input", "button", "select",
    "textarea", "option", "label", "fieldset", "legend", "noscript", "frame", "frameset",
];

/// Dangerous tags removed together with everything inside them.
const STRIP_WITH_CONTENT: &[&str] = &[
    "script", "iframe", "object", "applet", "noscript", "select", "textarea", "button", "legend",
    "frameset",
];

pub const HEADING_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];

pub const BLOCK_TAGS: &[&str] = &[
    "div", "section", "article", "header", "footer", "nav", "aside", "main", "figure",
    "figcaption", "address",
];

const JAVASCRIPT_URL: &str = r#"\b(href|src|action|background)\s*=\s*(?:"\s*javascript:[^"]*"|'\s*javascript:[^']*'|javascript:[^\s>]*)"#;

pub(super) fn rules() -> Vec<BuiltinRule> {
    vec![
        BuiltinRule::source(
            RuleMeta::new(
                "no-dangerous-tags",
                "No dangerous tags",
                Severity::Error,
                Category::Structure,
            )
            .description("Scripts, frames, embedded objects and form controls are stripped or blocked by email clients"),
            check_dangerous_tags,
        )
        .with_fix(fix_dangerous_tags),
        BuiltinRule::source(
            RuleMeta::new("no-heading-tags", "No heading tags", Severity::Error, Category::Structure)
                .description("Heading tags receive unpredictable default margins and sizes across clients"),
            check_heading_tags,
        )
        .with_fix(fix_heading_tags),
        BuiltinRule::source(
            RuleMeta::new(
                "no-paragraph-tags",
                "No paragraph tags",
                Severity::Error,
                Category::Structure,
            )
            .description("Paragraph margins differ between clients; use styled spans or table cells"),
            check_paragraph_tags,
        )
        .with_fix(fix_paragraph_tags),
        BuiltinRule::source(
            RuleMeta::new("no-block-tags", "No block tags", Severity::Error, Category::Structure)
                .description("Layout with div and HTML5 sectioning elements is not supported by Outlook"),
            check_block_tags,
        )
        .with_fix(fix_block_tags),
        BuiltinRule::source(
            RuleMeta::new("tag-format", "Tag format", Severity::Warning, Category::Structure)
                .description("Tag names should be lower-case and void elements must not have closing tags"),
            check_tag_format,
        )
        .with_fix(fix_tag_format),
        BuiltinRule::source(
            RuleMeta::new(
                "malformed-attributes",
                "Malformed attributes",
                Severity::Error,
                Category::Structure,
            )
            .description("Attribute values must be quoted, balanced and not repeated"),
            check_malformed_attributes,
        )
        .with_fix(fix_malformed_attributes),
        BuiltinRule::source(
            RuleMeta::new("javascript-urls", "No javascript: URLs", Severity::Error, Category::Structure)
                .description("javascript: URLs are blocked by every email client and flagged by spam filters"),
            check_javascript_urls,
        )
        .with_fix(fix_javascript_urls),
        BuiltinRule::source(
            RuleMeta::new(
                "no-event-handlers",
                "No event handlers",
                Severity::Error,
                Category::Structure,
            )
            .description("Inline on* event handler attributes never run in email"),
            check_event_handlers,
        )
        .with_fix(fix_event_handlers),
    ]
}

fn check_dangerous_tags(
    html: &str,
    ctx: &RuleContext<'_>,
    meta: &RuleMeta,
) -> RuleResult<Vec<ValidationResult>> {
    let re = ctx.pattern(&format!(r"<({})\b", DANGEROUS_TAGS.join("|")))?;
    Ok(re
        .captures_iter(html)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let tag = caps[1].to_ascii_lowercase();
            let suggestion = match tag.as_str() {
                "form" | "input" | "button" | "select" | "textarea" | "option" | "label"
                | "fieldset" | "legend" => "Link to a hosted form instead of embedding controls",
                _ => "Remove the element; email clients will not execute or render it",
            };
            Some(
                ValidationResult::new(meta, format!("<{}> is not allowed in email HTML", tag))
                    .at_offset(html, whole.start())
                    .suggestion(suggestion),
            )
        })
        .collect())
}

fn fix_dangerous_tags(html: &str, ctx: &RuleContext<'_>) -> RuleResult<String> {
    let mut fixed = html.to_string();
    for tag in STRIP_WITH_CONTENT {
        let re = ctx.pattern_with(
            &format!(r"<{tag}\b[^>]*>.*?</{tag}\s*>"),
            PatternFlags::SPANNING,
        )?;
        fixed = re.replace_all(&fixed, "").into_owned();
    }

    // Whatever is left: void controls, unwrapped containers, unclosed openers.
    let leftovers = ctx.pattern(&format!(r"</?({})\b[^<>]*>", DANGEROUS_TAGS.join("|")))?;
    Ok(leftovers.replace_all(&fixed, "").into_owned())
}

fn check_forbidden(
    html: &str,
    ctx: &RuleContext<'_>,
    meta: &RuleMeta,
    tags: &[&str],
    suggestion: &str,
) -> RuleResult<Vec<ValidationResult>> {
    let re = ctx.pattern(&open_tag_pattern(tags))?;
    Ok(re
        .captures_iter(html)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(
                ValidationResult::new(
                    meta,
                    format!("<{}> is not email-safe", caps[1].to_ascii_lowercase()),
                )
                .at_offset(html, whole.start())
                .suggestion(suggestion),
            )
        })
        .collect())
}

/// Rewrite the given tags into spans carrying `style_for(tag)` underneath
/// any style the author already set.
fn convert_to_span(
    html: &str,
    ctx: &RuleContext<'_>,
    tags: &[&str],
    style_for: fn(&str) -> &'static str,
) -> RuleResult<String> {
    let open = ctx.pattern(&open_tag_pattern(tags))?;
    let close = ctx.pattern(&close_tag_pattern(tags))?;

    let opened = replace_each(&open, html, |caps| {
        let tag = caps[1].to_ascii_lowercase();
        let attributes = with_base_style(&caps[2], style_for(&tag));
        Some(if caps[3].is_empty() {
            format!("<span{}>", attributes)
        } else {
            format!("<span{} />", attributes)
        })
    });
    Ok(close.replace_all(&opened, "</span>").into_owned())
}

fn heading_style(tag: &str) -> &'static str {
    match tag {
        "h1" => "display:block;font-size:32px;font-weight:bold;margin:0 0 16px 0;",
        "h2" => "display:block;font-size:24px;font-weight:bold;margin:0 0 14px 0;",
        "h3" => "display:block;font-size:19px;font-weight:bold;margin:0 0 12px 0;",
        "h4" => "display:block;font-size:16px;font-weight:bold;margin:0 0 10px 0;",
        "h5" => "display:block;font-size:13px;font-weight:bold;margin:0 0 8px 0;",
        _ => "display:block;font-size:12px;font-weight:bold;margin:0 0 8px 0;",
    }
}

fn check_heading_tags(
    html: &str,
    ctx: &RuleContext<'_>,
    meta: &RuleMeta,
) -> RuleResult<Vec<ValidationResult>> {
    check_forbidden(
        html,
        ctx,
        meta,
        HEADING_TAGS,
        "Use a <span> or <td> with inline font-size and font-weight",
    )
}

fn fix_heading_tags(html: &str, ctx: &RuleContext<'_>) -> RuleResult<String> {
    convert_to_span(html, ctx, HEADING_TAGS, heading_style)
}

fn check_paragraph_tags(
    html: &str,
    ctx: &RuleContext<'_>,
    meta: &RuleMeta,
) -> RuleResult<Vec<ValidationResult>> {
    check_forbidden(
        html,
        ctx,
        meta,
        &["p"],
        "Use a <span style=\"display:block\"> or a table cell with explicit margins",
    )
}

fn fix_paragraph_tags(html: &str, ctx: &RuleContext<'_>) -> RuleResult<String> {
    convert_to_span(html, ctx, &["p"], |_| "display:block;margin:0 0 16px 0;")
}

fn check_block_tags(
    html: &str,
    ctx: &RuleContext<'_>,
    meta: &RuleMeta,
) -> RuleResult<Vec<ValidationResult>> {
    check_forbidden(
        html,
        ctx,
        meta,
        BLOCK_TAGS,
        "Use tables for layout and spans for inline grouping",
    )
}

fn fix_block_tags(html: &str, ctx: &RuleContext<'_>) -> RuleResult<String> {
    convert_to_span(html, ctx, BLOCK_TAGS, |_| "display:block;")
}

fn check_tag_format(
    html: &str,
    ctx: &RuleContext<'_>,
    meta: &RuleMeta,
) -> RuleResult<Vec<ValidationResult>> {
    let mut results = Vec::new();

    let names = ctx.pattern_with(r"</?([a-zA-Z][a-zA-Z0-9]*)\b", PatternFlags::NONE)?;
    for caps in names.captures_iter(html) {
        let name = &caps[1];
        if name.chars().any(|c| c.is_ascii_uppercase())
            && let Some(whole) = caps.get(0)
        {
            results.push(
                ValidationResult::new(meta, format!("Tag name '{}' should be lower-case", name))
                    .at_offset(html, whole.start())
                    .suggestion(format!("Write '{}'", name.to_ascii_lowercase())),
            );
        }
    }

    let void_closers = ctx.pattern(&close_tag_pattern(VOID_TAGS))?;
    for caps in void_closers.captures_iter(html) {
        if let Some(whole) = caps.get(0) {
            let name = caps[1].to_ascii_lowercase();
            results.push(
                ValidationResult::new(
                    meta,
                    format!("Void element <{}> must not have a closing tag", name),
                )
                .at_offset(html, whole.start())
                .suggestion(format!("Use <{} /> without a closing tag", name)),
            );
        }
    }

    Ok(results)
}

fn fix_tag_format(html: &str, ctx: &RuleContext<'_>) -> RuleResult<String> {
    let names = ctx.pattern_with(r"(</?)([a-zA-Z][a-zA-Z0-9]*)\b", PatternFlags::NONE)?;
    let lowered = replace_each(&names, html, |caps| {
        let name = &caps[2];
        name.chars()
            .any(|c| c.is_ascii_uppercase())
            .then(|| format!("{}{}", &caps[1], name.to_ascii_lowercase()))
    });

    let br_closer = ctx.pattern(r"</br\s*>")?;
    let with_breaks = br_closer.replace_all(&lowered, "<br />").into_owned();

    let void_closers = ctx.pattern(&close_tag_pattern(VOID_TAGS))?;
    Ok(void_closers.replace_all(&with_breaks, "").into_owned())
}

fn check_malformed_attributes(
    html: &str,
    ctx: &RuleContext<'_>,
    meta: &RuleMeta,
) -> RuleResult<Vec<ValidationResult>> {
    let tags = ctx.pattern(OPEN_TAG)?;
    let mut results = Vec::new();

    for caps in tags.captures_iter(html) {
        let Some(whole) = caps.get(0) else { continue };
        let tag = caps[1].to_ascii_lowercase();
        let attributes = scan_attributes(&caps[2]);
        let mut seen: Vec<String> = Vec::new();

        for attribute in &attributes {
            let name = attribute.name.to_ascii_lowercase();
            let message = if attribute.unterminated {
                Some(format!("Attribute '{}' on <{}> has an unbalanced quote", name, tag))
            } else if attribute.spaced_equals {
                Some(format!("Attribute '{}' on <{}> has whitespace around '='", name, tag))
            } else if attribute.is_unquoted() {
                Some(format!("Attribute '{}' on <{}> has an unquoted value", name, tag))
            } else if name != "style" && seen.contains(&name) {
                Some(format!("Attribute '{}' appears more than once on <{}>", name, tag))
            } else {
                None
            };
            seen.push(name);

            if let Some(message) = message {
                results.push(
                    ValidationResult::new(meta, message)
                        .at_offset(html, whole.start())
                        .suggestion("Write attributes as name=\"value\" exactly once"),
                );
            }
        }
    }

    Ok(results)
}

fn fix_malformed_attributes(html: &str, ctx: &RuleContext<'_>) -> RuleResult<String> {
    let tags = ctx.pattern(OPEN_TAG)?;
    Ok(replace_each(&tags, html, |caps| {
        let attributes = scan_attributes(&caps[2]);
        let mut kept: Vec<RawAttribute> = Vec::with_capacity(attributes.len());
        let mut changed = false;

        for attribute in attributes {
            changed |= attribute.is_malformed();
            let duplicate = !attribute.is("style")
                && kept.iter().any(|existing| existing.is(&attribute.name));
            if duplicate {
                changed = true;
            } else {
                kept.push(attribute);
            }
        }

        changed.then(|| {
            let slash = if caps[3].is_empty() { "" } else { " /" };
            format!("<{}{}{}>", &caps[1], render_attributes(&kept), slash)
        })
    }))
}

fn check_javascript_urls(
    html: &str,
    ctx: &RuleContext<'_>,
    meta: &RuleMeta,
) -> RuleResult<Vec<ValidationResult>> {
    let re = ctx.pattern(JAVASCRIPT_URL)?;
    Ok(re
        .captures_iter(html)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(
                ValidationResult::new(
                    meta,
                    format!("'{}' uses a javascript: URL", caps[1].to_ascii_lowercase()),
                )
                .at_offset(html, whole.start())
                .suggestion("Link to a real https:// destination"),
            )
        })
        .collect())
}

fn fix_javascript_urls(html: &str, ctx: &RuleContext<'_>) -> RuleResult<String> {
    let re = ctx.pattern(JAVASCRIPT_URL)?;
    Ok(replace_each(&re, html, |caps| {
        Some(format!("{}=\"#\"", caps[1].to_ascii_lowercase()))
    }))
}

fn is_event_handler(name: &str) -> bool {
    name.len() > 2
        && name[..2].eq_ignore_ascii_case("on")
        && name.chars().all(|c| c.is_ascii_alphabetic())
}

fn check_event_handlers(
    html: &str,
    ctx: &RuleContext<'_>,
    meta: &RuleMeta,
) -> RuleResult<Vec<ValidationResult>> {
    let tags = ctx.pattern(OPEN_TAG)?;
    let mut results = Vec::new();

    for caps in tags.captures_iter(html) {
        let Some(whole) = caps.get(0) else { continue };
        for attribute in scan_attributes(&caps[2]) {
            if is_event_handler(&attribute.name) {
                results.push(
                    ValidationResult::new(
                        meta,
                        format!(
                            "Event handler '{}' on <{}> will not run in email",
                            attribute.name.to_ascii_lowercase(),
                            caps[1].to_ascii_lowercase()
                        ),
                    )
                    .at_offset(html, whole.start())
                    .suggestion("Remove the attribute"),
                );
            }
        }
    }

    Ok(results)
}

fn fix_event_handlers(html: &str, ctx: &RuleContext<'_>) -> RuleResult<String> {
    let tags = ctx.pattern(OPEN_TAG)?;
    Ok(replace_each(&tags, html, |caps| {
        let attributes = scan_attributes(&caps[2]);
        if !attributes.iter().any(|a| is_event_handler(&a.name)) {
            return None;
        }
        let kept: Vec<_> = attributes
            .into_iter()
            .filter(|a| !is_event_handler(&a.name))
            .collect();
        let slash = if caps[3].is_empty() { "" } else { " /" };
        Some(format!("<{}{}{}>", &caps[1], render_attributes(&kept), slash))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PatternCache;
    use crate::config::EngineConfig;
    use crate::rules::{CheckFn, FixFn};

    fn run_check(check: CheckFn, name: &str, html: &str) -> Vec<ValidationResult> {
        let config = EngineConfig::default();
        let patterns = PatternCache::default();
        let ctx = RuleContext::new(&config, &patterns);
        let meta = RuleMeta::new(name, name, Severity::Error, Category::Structure);
        check(html, &ctx, &meta).unwrap()
    }

    fn run_fix(fix: FixFn, html: &str) -> String {
        let config = EngineConfig::default();
        let patterns = PatternCache::default();
        let ctx = RuleContext::new(&config, &patterns);
        fix(html, &ctx).unwrap()
    }

    #[test]
    fn test_dangerous_tags_detected_with_position() {
        let results = run_check(
            check_dangerous_tags,
            "no-dangerous-tags",
            "<table>\n<tr><td><script>x()</script></td></tr></table>",
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].line, Some(2));
        assert!(results[0].message.contains("<script>"));
    }

    #[test]
    fn test_dangerous_tags_fix() {
        let html = r#"<span>a</span><script>alert(1)</script><form action="/x"><input type="text"><b>keep</b></form><iframe src="x"></iframe>"#;
        assert_eq!(run_fix(fix_dangerous_tags, html), "<span>a</span><b>keep</b>");
    }

    #[test]
    fn test_heading_fix_produces_styled_span() {
        let fixed = run_fix(fix_heading_tags, "<h1>Title</h1>");
        assert!(fixed.starts_with("<span style=\"display:block;font-size:32px;"));
        assert!(fixed.ends_with(">Title</span>"));
    }

    #[test]
    fn test_heading_fix_keeps_author_style_and_attributes() {
        let fixed = run_fix(fix_heading_tags, r#"<H2 class="t" style="color:red">x</H2>"#);
        assert_eq!(
            fixed,
            r#"<span class="t" style="display:block;font-size:24px;font-weight:bold;margin:0 0 14px 0;color:red;">x</span>"#
        );
    }

    #[test]
    fn test_paragraph_does_not_match_pre() {
        let results = run_check(check_paragraph_tags, "no-paragraph-tags", "<pre>x</pre><p>y</p>");
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_block_tags_fix() {
        let fixed = run_fix(fix_block_tags, "<div><section>x</section></div>");
        assert_eq!(
            fixed,
            r#"<span style="display:block;"><span style="display:block;">x</span></span>"#
        );
    }

    #[test]
    fn test_tag_format() {
        let html = "<TD>x</TD><br></br><img src=\"a\"></img>";
        let results = run_check(check_tag_format, "tag-format", html);
        assert_eq!(results.len(), 4);

        assert_eq!(run_fix(fix_tag_format, html), "<td>x</td><br><br /><img src=\"a\">");
    }

    #[test]
    fn test_malformed_attributes() {
        let html = r#"<td width=600 align = "left" class="a" class="b" title="x>y</td>"#;
        let results = run_check(check_malformed_attributes, "malformed-attributes", html);
        assert_eq!(results.len(), 4);

        assert_eq!(
            run_fix(fix_malformed_attributes, html),
            r#"<td width="600" align="left" class="a" title="x">y</td>"#
        );
    }

    #[test]
    fn test_well_formed_tags_untouched() {
        let html = r#"<td width="600" style="a:b" style="c:d">y</td><br/>"#;
        assert!(run_check(check_malformed_attributes, "malformed-attributes", html).is_empty());
        assert_eq!(run_fix(fix_malformed_attributes, html), html);
    }

    #[test]
    fn test_javascript_urls() {
        let html = r#"<a href="javascript:alert('x')">a</a><a href='JavaScript:void(0)'>b</a><a href="https://ok.test">c</a>"#;
        assert_eq!(run_check(check_javascript_urls, "javascript-urls", html).len(), 2);
        assert_eq!(
            run_fix(fix_javascript_urls, html),
            r##"<a href="#">a</a><a href="#">b</a><a href="https://ok.test">c</a>"##
        );
    }

    #[test]
    fn test_event_handlers() {
        let html = r#"<td onclick="x()" class="c"><img onload="y()" src="a"/></td>"#;
        assert_eq!(run_check(check_event_handlers, "no-event-handlers", html).len(), 2);
        assert_eq!(
            run_fix(fix_event_handlers, html),
            r#"<td class="c"><img src="a" /></td>"#
        );
    }
}
