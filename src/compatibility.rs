//! Per-client compatibility report.
//!
//! Independent of the rule registry: each targeted client gets a list of
//! caveats found in the markup, and is compatible when that list is empty.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cache::PatternCache;
use crate::cache::PatternFlags;
use crate::config::EngineConfig;
use crate::error::RuleResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmailClient {
    Outlook,
    Gmail,
    AppleMail,
    Thunderbird,
    Mobile,
}

impl EmailClient {
    pub const ALL: [EmailClient; 5] = [
        EmailClient::Outlook,
        EmailClient::Gmail,
        EmailClient::AppleMail,
        EmailClient::Thunderbird,
        EmailClient::Mobile,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EmailClient::Outlook => "outlook",
            EmailClient::Gmail => "gmail",
            EmailClient::AppleMail => "apple-mail",
            EmailClient::Thunderbird => "thunderbird",
            EmailClient::Mobile => "mobile",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            EmailClient::Outlook => "Outlook",
            EmailClient::Gmail => "Gmail",
            EmailClient::AppleMail => "Apple Mail",
            EmailClient::Thunderbird => "Thunderbird",
            EmailClient::Mobile => "Mobile",
        }
    }

    /// Parse a comma-separated client list such as `outlook, apple-mail`.
    pub fn parse_list(list: &str) -> Result<Vec<EmailClient>, String> {
        let mut clients = Vec::new();
        for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let client = name.parse::<EmailClient>()?;
            if !clients.contains(&client) {
                clients.push(client);
            }
        }
        Ok(clients)
    }
}

impl fmt::Display for EmailClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmailClient {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "outlook" => Ok(EmailClient::Outlook),
            "gmail" => Ok(EmailClient::Gmail),
            "apple-mail" | "apple_mail" | "applemail" => Ok(EmailClient::AppleMail),
            "thunderbird" => Ok(EmailClient::Thunderbird),
            "mobile" => Ok(EmailClient::Mobile),
            other => Err(format!("unknown email client '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCompatibility {
    pub compatible: bool,
    pub issues: Vec<String>,
}

impl ClientCompatibility {
    fn from_issues(issues: Vec<String>) -> Self {
        Self {
            compatible: issues.is_empty(),
            issues,
        }
    }
}

pub type CompatibilityReport = BTreeMap<EmailClient, ClientCompatibility>;

/// A pattern whose presence is a caveat for a client.
struct Probe {
    pattern: &'static str,
    issue: &'static str,
}

const OUTLOOK_PROBES: &[Probe] = &[
    Probe {
        pattern: r"display\s*:\s*(?:inline-)?flex\b",
        issue: "Flexbox layout is not supported",
    },
    Probe {
        pattern: r"display\s*:\s*(?:inline-)?grid\b",
        issue: "CSS grid layout is not supported",
    },
    Probe {
        pattern: r"position\s*:\s*(?:absolute|fixed)\b",
        issue: "Absolute and fixed positioning are ignored",
    },
    Probe {
        pattern: r"(?:linear|radial)-gradient\s*\(",
        issue: "CSS gradients are not rendered",
    },
    Probe {
        pattern: r"background-image\s*:",
        issue: "CSS background images are not shown",
    },
    Probe {
        pattern: r"border-radius\s*:",
        issue: "Rounded corners are rendered square",
    },
];

const GMAIL_PROBES: &[Probe] = &[
    Probe {
        pattern: r"<style\b",
        issue: "Embedded <style> blocks are removed in some Gmail apps",
    },
    Probe {
        pattern: r"background-image\s*:|url\s*\(",
        issue: "Background images and url() references may be stripped",
    },
    Probe {
        pattern: r#"<link\b[^>]*\brel\s*=\s*["']?stylesheet"#,
        issue: "Linked stylesheets are not loaded",
    },
    Probe {
        pattern: r"@import\b",
        issue: "@import rules are not loaded",
    },
    Probe {
        pattern: r"@media\b",
        issue: "Media queries are unsupported for non-Google accounts",
    },
];

const APPLE_MAIL_PROBES: &[Probe] = &[
    Probe {
        pattern: r"<script\b",
        issue: "Scripts are never executed",
    },
    Probe {
        pattern: r"<form\b",
        issue: "Forms are disabled",
    },
];

const THUNDERBIRD_PROBES: &[Probe] = &[
    Probe {
        pattern: r"position\s*:\s*fixed\b",
        issue: "Fixed positioning escapes the message pane",
    },
    Probe {
        pattern: r"<script\b",
        issue: "Scripts are blocked",
    },
];

fn probe_issues(
    html: &str,
    probes: &[Probe],
    patterns: &PatternCache,
) -> RuleResult<Vec<String>> {
    let mut issues = Vec::new();
    for probe in probes {
        if patterns
            .get_or_compile(probe.pattern, PatternFlags::CASE_INSENSITIVE)?
            .is_match(html)
        {
            issues.push(probe.issue.to_string());
        }
    }
    Ok(issues)
}

fn contains(html: &str, pattern: &str, patterns: &PatternCache) -> RuleResult<bool> {
    Ok(patterns
        .get_or_compile(pattern, PatternFlags::CASE_INSENSITIVE)?
        .is_match(html))
}

fn outlook_issues(html: &str, patterns: &PatternCache) -> RuleResult<Vec<String>> {
    let mut issues = probe_issues(html, OUTLOOK_PROBES, patterns)?;
    if contains(html, r"max-width\s*:", patterns)? && !contains(html, r"<!--\[if\s+(?:gte\s+)?mso", patterns)? {
        issues.push("max-width is ignored without an MSO conditional fallback".to_string());
    }
    Ok(issues)
}

fn gmail_issues(
    html: &str,
    config: &EngineConfig,
    patterns: &PatternCache,
) -> RuleResult<Vec<String>> {
    let mut issues = probe_issues(html, GMAIL_PROBES, patterns)?;
    let limit = config.thresholds.gmail_clip_bytes;
    if html.len() > limit {
        issues.push(format!(
            "Message is clipped: {} bytes exceeds {} bytes",
            html.len(),
            limit
        ));
    }
    Ok(issues)
}

fn mobile_issues(
    html: &str,
    config: &EngineConfig,
    patterns: &PatternCache,
) -> RuleResult<Vec<String>> {
    let mut issues = Vec::new();
    let limit = config.thresholds.max_width_px;
    let has_max_width = contains(html, r"max-width\s*:", patterns)?;

    if !has_max_width {
        let widths = patterns.get_or_compile(
            r#"(?:^|[^-\w])width\s*(?::\s*(\d+)px|=\s*["']?(\d+))"#,
            PatternFlags::CASE_INSENSITIVE,
        )?;
        let widest = widths
            .captures_iter(html)
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
            .filter_map(|m| m.as_str().parse::<u32>().ok())
            .max();
        if let Some(widest) = widest
            && widest > limit
        {
            issues.push(format!(
                "Fixed width of {}px exceeds {}px without max-width",
                widest, limit
            ));
        }

        if contains(html, r#"<table\b[^>]*\swidth\s*=\s*["']?\d+(?:px)?["']?[\s/>]"#, patterns)? {
            issues.push("Tables use fixed pixel widths without max-width".to_string());
        }
    }

    let min_font = config.thresholds.min_font_size_px;
    let font_sizes = patterns.get_or_compile(
        r"font-size\s*:\s*(\d+(?:\.\d+)?)px",
        PatternFlags::CASE_INSENSITIVE,
    )?;
    let smallest = font_sizes
        .captures_iter(html)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<f64>().ok())
        .fold(None, |smallest: Option<f64>, size| {
            Some(smallest.map_or(size, |s| s.min(size)))
        });
    if let Some(smallest) = smallest
        && smallest < f64::from(min_font)
    {
        issues.push(format!(
            "Font size of {}px is below {}px and may be enlarged by iOS",
            smallest, min_font
        ));
    }

    Ok(issues)
}

/// Compatibility of `html` with every targeted client.
pub fn compatibility_report(
    html: &str,
    config: &EngineConfig,
    patterns: &PatternCache,
) -> RuleResult<CompatibilityReport> {
    let mut report = CompatibilityReport::new();

    for client in config.clients.enabled() {
        let issues = match client {
            EmailClient::Outlook => outlook_issues(html, patterns)?,
            EmailClient::Gmail => gmail_issues(html, config, patterns)?,
            EmailClient::AppleMail => probe_issues(html, APPLE_MAIL_PROBES, patterns)?,
            EmailClient::Thunderbird => probe_issues(html, THUNDERBIRD_PROBES, patterns)?,
            EmailClient::Mobile => mobile_issues(html, config, patterns)?,
        };
        report.insert(client, ClientCompatibility::from_issues(issues));
    }

    Ok(report)
}
