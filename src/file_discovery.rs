use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use tokio::fs;
use tracing::warn;

use crate::error::{ConfigError, EngineError, Result};

fn build_glob_set(patterns: &[String], kind: &str) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob: Glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| {
                ConfigError::Validation(format!("Invalid {} pattern '{}': {}", kind, pattern, e))
            })?;
        builder.add(glob);
    }

    let set = builder.build().map_err(|e| {
        ConfigError::Validation(format!("Failed to build {} pattern set: {}", kind, e))
    })?;
    Ok(Some(set))
}

/// Finds HTML files under files and directories given on the command line
#[derive(Debug, Clone)]
pub struct FileDiscovery {
    /// File extensions to include, lower-case and without the dot
    extensions: Vec<String>,
    include_set: Option<GlobSet>,
    exclude_set: Option<GlobSet>,
    /// Maximum directory depth (None = unlimited)
    max_depth: Option<usize>,
    follow_symlinks: bool,
}

impl FileDiscovery {
    pub fn new() -> Self {
        Self {
            extensions: vec!["html".to_string(), "htm".to_string()],
            include_set: None,
            exclude_set: None,
            max_depth: None,
            follow_symlinks: false,
        }
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions
            .into_iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    /// Only files matching at least one of these globs are kept
    pub fn with_include_patterns(mut self, patterns: Vec<String>) -> Result<Self> {
        self.include_set = build_glob_set(&patterns, "include")?;
        Ok(self)
    }

    /// Files matching any of these globs are dropped
    pub fn with_exclude_patterns(mut self, patterns: Vec<String>) -> Result<Self> {
        self.exclude_set = build_glob_set(&patterns, "exclude")?;
        Ok(self)
    }

    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Discover files in `path`. A file path is returned as-is when it passes
    /// the filters; a directory is walked recursively. Results are sorted.
    pub async fn discover_files(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let metadata = fs::metadata(path).await.map_err(|e| EngineError::Discovery {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut files = Vec::new();
        if metadata.is_file() {
            if self.should_process(path) {
                files.push(path.to_path_buf());
            }
            return Ok(files);
        }

        self.walk(path.to_path_buf(), 0, &mut files).await?;
        files.sort();
        Ok(files)
    }

    /// Discover files under every path, without duplicates.
    pub async fn discover_all(&self, paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for path in paths {
            files.extend(self.discover_files(path).await?);
        }
        files.sort();
        files.dedup();
        Ok(files)
    }

    fn walk<'a>(
        &'a self,
        dir: PathBuf,
        depth: usize,
        files: &'a mut Vec<PathBuf>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut read_dir = fs::read_dir(&dir).await?;

            while let Some(entry) = read_dir.next_entry().await? {
                let entry_path = entry.path();
                if entry_path.is_symlink() && !self.follow_symlinks {
                    continue;
                }

                let metadata = match fs::metadata(&entry_path).await {
                    Ok(metadata) => metadata,
                    Err(e) => {
                        warn!(path = %entry_path.display(), error = %e, "skipping unreadable entry");
                        continue;
                    }
                };

                if metadata.is_file() {
                    if self.should_process(&entry_path) {
                        files.push(entry_path);
                    }
                } else if metadata.is_dir() {
                    if self.max_depth.is_some_and(|max| depth >= max) {
                        continue;
                    }
                    if let Err(e) = self.walk(entry_path.clone(), depth + 1, files).await {
                        warn!(path = %entry_path.display(), error = %e, "skipping directory");
                    }
                }
            }

            Ok(())
        })
    }

    /// Check if a file passes the extension and pattern filters
    pub fn should_process(&self, path: &Path) -> bool {
        let Some(extension) = path.extension().and_then(|ext| ext.to_str()) else {
            return false;
        };
        if !self.extensions.contains(&extension.to_ascii_lowercase()) {
            return false;
        }

        if let Some(exclude_set) = &self.exclude_set
            && exclude_set.is_match(path)
        {
            return false;
        }

        match &self.include_set {
            Some(include_set) => include_set.is_match(path),
            None => true,
        }
    }
}

impl Default for FileDiscovery {
    fn default() -> Self {
        Self::new()
    }
}
