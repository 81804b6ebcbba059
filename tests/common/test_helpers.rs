use std::path::PathBuf;

use tempfile::TempDir;
use tokio::fs;

/// Table-based markup that passes every default rule.
pub const CLEAN_EMAIL: &str = r#"<table role="presentation" cellpadding="0" cellspacing="0" border="0"><tr><td><a href="https://x.test">Shop</a></td></tr></table>"#;

/// Web-page style markup that trips several structure rules.
pub const LEGACY_EMAIL: &str = r#"<div class="wrap"><h1>Welcome</h1><p>Thanks for joining.</p><img src="hero.png"><script>track()</script></div>"#;

/// Structure rules reported for [`LEGACY_EMAIL`].
pub const LEGACY_STRUCTURE_RULES: &[&str] = &[
    "no-block-tags",
    "no-heading-tags",
    "no-paragraph-tags",
    "no-dangerous-tags",
];

/// Temporary tree of email templates:
///
/// ```text
/// clean.html
/// legacy.html
/// notes.txt
/// campaigns/launch.htm
/// drafts/broken.html
/// ```
pub async fn create_temp_email_files() -> std::io::Result<TempDir> {
    let temp_dir = TempDir::new()?;
    let root = temp_dir.path();

    fs::create_dir_all(root.join("campaigns")).await?;
    fs::create_dir_all(root.join("drafts")).await?;

    fs::write(root.join("clean.html"), CLEAN_EMAIL).await?;
    fs::write(root.join("legacy.html"), LEGACY_EMAIL).await?;
    fs::write(root.join("notes.txt"), "not an email").await?;
    fs::write(root.join("campaigns/launch.htm"), CLEAN_EMAIL).await?;
    fs::write(root.join("drafts/broken.html"), "<div>Unclosed <h2>heading").await?;

    Ok(temp_dir)
}

/// Write a single file into a fresh temporary directory.
pub async fn create_temp_file(name: &str, content: &[u8]) -> std::io::Result<(TempDir, PathBuf)> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join(name);
    fs::write(&path, content).await?;
    Ok((temp_dir, path))
}

/// Markup that stresses the parser: unterminated constructs, stray brackets
/// and deep nesting.
pub fn adversarial_inputs() -> Vec<String> {
    vec![
        "<".to_string(),
        "<<<<>>>>".to_string(),
        "<div".to_string(),
        "<div class=\"unterminated".to_string(),
        "<div class='a' class='b' =x ==y".to_string(),
        "<!--never closed".to_string(),
        "<!DOCTYPE".to_string(),
        "</>".to_string(),
        "</div></div></div>".to_string(),
        "<script>while(1){}".to_string(),
        "<style>td { color: red".to_string(),
        "<a href=>x</a".to_string(),
        "<td ".repeat(2_000),
        "<div>".repeat(5_000),
        format!("<img {}>", "a=\"1\" ".repeat(1_000)),
        "\u{0}\u{feff}<\u{1f600}>é</\u{1f600}>".to_string(),
    ]
}
