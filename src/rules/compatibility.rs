//! Client compatibility rules. Checks tied to specific clients only run when
//! one of those clients is targeted.

use super::markup::{OPEN_TAG, find_attribute, open_tag_pattern, replace_each, scan_attributes};
use super::structure::{BLOCK_TAGS, DANGEROUS_TAGS, HEADING_TAGS};
use super::{BuiltinRule, Category, RuleContext, RuleMeta, Severity, ValidationResult};
use crate::compatibility::EmailClient;
use crate::error::RuleResult;

/// Tags known to render consistently across email clients.
pub const EMAIL_SAFE_TAGS: &[&str] = &[
    "html", "head", "body", "meta", "title", "style", "link", "base", "table", "thead", "tbody",
    "tfoot", "tr", "td", "th", "caption", "col", "colgroup", "a", "img", "map", "area", "span",
    "strong", "b", "em", "i", "u", "br", "hr", "font", "center", "small", "big", "s", "strike",
    "sub", "sup", "ul", "ol", "li", "blockquote", "pre", "code",
];

struct CssFeature {
    pattern: &'static str,
    label: &'static str,
    unsupported_by: &'static [EmailClient],
}

const CSS_FEATURES: &[CssFeature] = &[
    CssFeature {
        pattern: r"display\s*:\s*(?:inline-)?flex\b",
        label: "display:flex",
        unsupported_by: &[EmailClient::Outlook],
    },
    CssFeature {
        pattern: r"display\s*:\s*(?:inline-)?grid\b",
        label: "display:grid",
        unsupported_by: &[EmailClient::Outlook, EmailClient::Gmail],
    },
    CssFeature {
        pattern: r"position\s*:\s*(?:absolute|fixed|relative|sticky)\b",
        label: "CSS positioning",
        unsupported_by: &[EmailClient::Outlook, EmailClient::Gmail],
    },
    CssFeature {
        pattern: r"float\s*:\s*(?:left|right)\b",
        label: "float",
        unsupported_by: &[EmailClient::Outlook],
    },
    CssFeature {
        pattern: r"(?:linear|radial)-gradient\s*\(",
        label: "CSS gradients",
        unsupported_by: &[EmailClient::Outlook],
    },
    CssFeature {
        pattern: r"border-radius\s*:",
        label: "border-radius",
        unsupported_by: &[EmailClient::Outlook],
    },
];

const BACKGROUND_IMAGE: &str = r#"background-image\s*:\s*url\(|background\s*:[^;"'>]*url\(|\bbackground\s*=\s*["']?[^"'\s>]+"#;

pub(super) fn rules() -> Vec<BuiltinRule> {
    vec![
        BuiltinRule::source(
            RuleMeta::new(
                "email-safe-tags",
                "Email-safe tags",
                Severity::Warning,
                Category::Compatibility,
            )
            .description("Tags outside the email-safe set render inconsistently"),
            check_email_safe_tags,
        ),
        BuiltinRule::source(
            RuleMeta::new(
                "css-compatibility",
                "CSS compatibility",
                Severity::Warning,
                Category::Compatibility,
            )
            .description("Layout CSS such as flexbox, grid and positioning is unsupported by major clients"),
            check_css_compatibility,
        ),
        BuiltinRule::source(
            RuleMeta::new(
                "embedded-styles",
                "Embedded styles",
                Severity::Warning,
                Category::Compatibility,
            )
            .description("Some clients strip <style> blocks; critical styles should be inline"),
            check_embedded_styles,
        ),
        BuiltinRule::source(
            RuleMeta::new(
                "external-stylesheets",
                "External stylesheets",
                Severity::Error,
                Category::Compatibility,
            )
            .description("Email clients never load linked or imported stylesheets"),
            check_external_stylesheets,
        )
        .with_fix(fix_external_stylesheets),
        BuiltinRule::source(
            RuleMeta::new(
                "background-images",
                "Background images",
                Severity::Warning,
                Category::Compatibility,
            )
            .description("Outlook ignores background images without a VML fallback"),
            check_background_images,
        ),
        BuiltinRule::source(
            RuleMeta::new("fixed-widths", "Fixed widths", Severity::Info, Category::Compatibility)
                .description("Wide fixed widths overflow mobile screens"),
            check_fixed_widths,
        ),
    ]
}

fn targets_any(ctx: &RuleContext<'_>, clients: &[EmailClient]) -> bool {
    clients.iter().any(|client| ctx.config.clients.targets(*client))
}

fn client_list(clients: &[EmailClient]) -> String {
    clients
        .iter()
        .map(|client| client.display_name())
        .collect::<Vec<_>>()
        .join(" and ")
}

fn check_email_safe_tags(
    html: &str,
    ctx: &RuleContext<'_>,
    meta: &RuleMeta,
) -> RuleResult<Vec<ValidationResult>> {
    let tags = ctx.pattern(OPEN_TAG)?;
    let mut reported: Vec<String> = Vec::new();
    let mut results = Vec::new();

    for caps in tags.captures_iter(html) {
        let Some(whole) = caps.get(0) else { continue };
        let tag = caps[1].to_ascii_lowercase();
        let covered_elsewhere = DANGEROUS_TAGS.contains(&tag.as_str())
            || HEADING_TAGS.contains(&tag.as_str())
            || BLOCK_TAGS.contains(&tag.as_str())
            || tag == "p";
        if EMAIL_SAFE_TAGS.contains(&tag.as_str()) || covered_elsewhere || reported.contains(&tag) {
            continue;
        }

        results.push(
            ValidationResult::new(meta, format!("<{}> is not an email-safe tag", tag))
                .at_offset(html, whole.start())
                .suggestion("Use tables, spans and inline formatting tags"),
        );
        reported.push(tag);
    }

    Ok(results)
}

fn check_css_compatibility(
    html: &str,
    ctx: &RuleContext<'_>,
    meta: &RuleMeta,
) -> RuleResult<Vec<ValidationResult>> {
    let mut results = Vec::new();

    for feature in CSS_FEATURES {
        let affected: Vec<EmailClient> = feature
            .unsupported_by
            .iter()
            .copied()
            .filter(|client| ctx.config.clients.targets(*client))
            .collect();
        if affected.is_empty() {
            continue;
        }

        let re = ctx.pattern(feature.pattern)?;
        let mut matches = re.find_iter(html);
        let Some(first) = matches.next() else { continue };
        let occurrences = 1 + matches.count();

        results.push(
            ValidationResult::new(
                meta,
                format!(
                    "{} is not supported by {} ({} occurrence{})",
                    feature.label,
                    client_list(&affected),
                    occurrences,
                    if occurrences == 1 { "" } else { "s" }
                ),
            )
            .at_offset(html, first.start())
            .suggestion("Use table-based layout for structure"),
        );
    }

    Ok(results)
}

fn check_embedded_styles(
    html: &str,
    ctx: &RuleContext<'_>,
    meta: &RuleMeta,
) -> RuleResult<Vec<ValidationResult>> {
    let styles = ctx.pattern(r"<style\b")?;
    Ok(styles
        .find_iter(html)
        .map(|found| {
            ValidationResult::new(meta, "Embedded <style> block may be stripped")
                .at_offset(html, found.start())
                .suggestion("Inline critical styles on the elements they apply to")
        })
        .collect())
}

fn is_stylesheet_link(attribute_text: &str) -> bool {
    let attributes = scan_attributes(attribute_text);
    find_attribute(&attributes, "rel")
        .and_then(|rel| rel.value.as_deref())
        .is_some_and(|rel| rel.to_ascii_lowercase().contains("stylesheet"))
}

fn check_external_stylesheets(
    html: &str,
    ctx: &RuleContext<'_>,
    meta: &RuleMeta,
) -> RuleResult<Vec<ValidationResult>> {
    let mut results = Vec::new();

    let links = ctx.pattern(&open_tag_pattern(&["link"]))?;
    for caps in links.captures_iter(html) {
        if let Some(whole) = caps.get(0)
            && is_stylesheet_link(&caps[2])
        {
            results.push(
                ValidationResult::new(meta, "Linked stylesheet will not be loaded")
                    .at_offset(html, whole.start())
                    .suggestion("Inline the styles"),
            );
        }
    }

    let imports = ctx.pattern(r"@import\b")?;
    for found in imports.find_iter(html) {
        results.push(
            ValidationResult::new(meta, "@import will not be loaded")
                .at_offset(html, found.start())
                .suggestion("Inline the imported styles"),
        );
    }

    Ok(results)
}

fn fix_external_stylesheets(html: &str, ctx: &RuleContext<'_>) -> RuleResult<String> {
    let links = ctx.pattern(&open_tag_pattern(&["link"]))?;
    Ok(replace_each(&links, html, |caps| {
        is_stylesheet_link(&caps[2]).then(String::new)
    }))
}

fn check_background_images(
    html: &str,
    ctx: &RuleContext<'_>,
    meta: &RuleMeta,
) -> RuleResult<Vec<ValidationResult>> {
    if !targets_any(ctx, &[EmailClient::Outlook]) {
        return Ok(Vec::new());
    }

    let re = ctx.pattern(BACKGROUND_IMAGE)?;
    Ok(re
        .find_iter(html)
        .map(|found| {
            ValidationResult::new(meta, "Background image is not shown by Outlook")
                .at_offset(html, found.start())
                .suggestion("Set a background colour fallback or add a VML background")
        })
        .collect())
}

fn check_fixed_widths(
    html: &str,
    ctx: &RuleContext<'_>,
    meta: &RuleMeta,
) -> RuleResult<Vec<ValidationResult>> {
    if !targets_any(ctx, &[EmailClient::Mobile]) {
        return Ok(Vec::new());
    }

    let limit = ctx.config.thresholds.max_width_px;
    let re = ctx.pattern(r#"\bwidth\s*(?::\s*(\d+)px|=\s*["']?(\d+)(?:px)?\b)"#)?;
    let mut results = Vec::new();

    for caps in re.captures_iter(html) {
        let Some(whole) = caps.get(0) else { continue };
        // max-width and min-width are what make fixed widths safe
        if html[..whole.start()].ends_with('-') {
            continue;
        }
        let width = caps
            .get(1)
            .or_else(|| caps.get(2))
            .and_then(|m| m.as_str().parse::<u32>().ok());
        if let Some(width) = width
            && width > limit
        {
            results.push(
                ValidationResult::new(
                    meta,
                    format!("Fixed width of {}px exceeds {}px", width, limit),
                )
                .at_offset(html, whole.start())
                .suggestion(format!("Use width:100% with max-width:{}px", limit)),
            );
        }
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PatternCache;
    use crate::config::EngineConfig;
    use crate::rules::{Rule, RuleRegistry};

    fn check_with(config: &EngineConfig, name: &str, html: &str) -> Vec<ValidationResult> {
        let registry = RuleRegistry::with_builtin_rules();
        let patterns = PatternCache::default();
        let ctx = RuleContext::new(config, &patterns);
        registry.get(name).unwrap().check(html, &ctx).unwrap()
    }

    fn check(name: &str, html: &str) -> Vec<ValidationResult> {
        check_with(&EngineConfig::default(), name, html)
    }

    #[test]
    fn test_email_safe_tags_reports_each_tag_once() {
        let html = "<video></video><video></video><svg></svg><div>x</div><td>x</td>";
        let results = check("email-safe-tags", html);
        let messages: Vec<_> = results.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(
            messages,
            vec!["<video> is not an email-safe tag", "<svg> is not an email-safe tag"]
        );
    }

    #[test]
    fn test_css_compatibility_counts_occurrences() {
        let html = r#"<td style="display:flex"><span style="display: flex;float:left">x</span></td>"#;
        let results = check("css-compatibility", html);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].message, "display:flex is not supported by Outlook (2 occurrences)");
        assert!(results[1].message.starts_with("float"));
    }

    #[test]
    fn test_css_compatibility_respects_target_clients() {
        let mut config = EngineConfig::default();
        config.clients.outlook = false;
        let results = check_with(&config, "css-compatibility", r#"<td style="display:grid">x</td>"#);
        assert_eq!(results.len(), 1);
        assert!(results[0].message.contains("Gmail"));
        assert!(!results[0].message.contains("Outlook"));
    }

    #[test]
    fn test_external_stylesheets() {
        let html = r#"<link rel="stylesheet" href="a.css"><link rel="icon" href="i.png"><style>@import url(b.css);</style>"#;
        assert_eq!(check("external-stylesheets", html).len(), 2);

        let config = EngineConfig::default();
        let patterns = PatternCache::default();
        let ctx = RuleContext::new(&config, &patterns);
        assert_eq!(
            fix_external_stylesheets(html, &ctx).unwrap(),
            r#"<link rel="icon" href="i.png"><style>@import url(b.css);</style>"#
        );
    }

    #[test]
    fn test_background_images() {
        let html = r#"<td background="bg.png" style="background-image: url(x.png)">x</td>"#;
        assert_eq!(check("background-images", html).len(), 2);
    }

    #[test]
    fn test_fixed_widths_ignore_max_width() {
        let html = r#"<table width="800"><tr><td style="max-width:900px;width:500px">x</td></tr></table>"#;
        let results = check("fixed-widths", html);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].message, "Fixed width of 800px exceeds 600px");
    }

    #[test]
    fn test_embedded_styles() {
        assert_eq!(check("embedded-styles", "<style>td{}</style><STYLE></STYLE>").len(), 2);
    }
}
