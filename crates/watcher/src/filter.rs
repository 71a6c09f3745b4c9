//! Path filtering for the filesystem change source
//!
//! Supports multiple sources of ignore patterns:
//! 1. Built-in patterns (VCS metadata, build output, editor temp files - always active)
//! 2. .gitignore patterns (optional, enabled by default)
//! 3. .quiesceignore patterns (optional, enabled by default)
//! 4. Config-based patterns (gitignore syntax)

use anyhow::{Context, Result};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Directories never worth reporting on
///
/// Generic names such as `bin` are left to ignore files, since Cargo keeps
/// sources under `src/bin`.
const BUILTIN_DIRS: &[&str] = &[
    ".git", ".jj", ".hg", ".svn", "target", "node_modules", ".idea", ".vscode",
];

/// Watch-side configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Use .gitignore patterns (default: true)
    pub use_gitignore: bool,

    /// Use .quiesceignore patterns (default: true)
    pub use_quiesceignore: bool,

    /// Additional gitignore-style patterns
    pub additional_patterns: Vec<String>,

    /// File names treated as project manifests
    pub project_manifests: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            use_gitignore: true,
            use_quiesceignore: true,
            additional_patterns: vec![],
            project_manifests: vec!["Cargo.toml".to_string(), "package.json".to_string()],
        }
    }
}

/// Decides which paths under a root are reported
///
/// Precedence: built-ins, then .quiesceignore, then .gitignore, then
/// configured patterns. Paths are relative to the root.
pub struct PathFilter {
    root: PathBuf,
    gitignore: Option<Gitignore>,
    quiesceignore: Option<Gitignore>,
    extra: Option<Gitignore>,
    config: WatchConfig,
}

impl PathFilter {
    /// Load ignore files under `root`
    pub fn load(root: &Path, config: WatchConfig) -> Result<Self> {
        let mut filter = Self {
            root: root.to_path_buf(),
            gitignore: None,
            quiesceignore: None,
            extra: None,
            config,
        };

        filter.reload()?;
        Ok(filter)
    }

    /// Re-read ignore files from disk
    pub fn reload(&mut self) -> Result<()> {
        self.gitignore = if self.config.use_gitignore {
            self.load_ignore_file(".gitignore")?
        } else {
            None
        };

        self.quiesceignore = if self.config.use_quiesceignore {
            self.load_ignore_file(".quiesceignore")?
        } else {
            None
        };

        self.extra = if self.config.additional_patterns.is_empty() {
            None
        } else {
            let mut builder = GitignoreBuilder::new(&self.root);
            for pattern in &self.config.additional_patterns {
                builder
                    .add_line(None, pattern)
                    .with_context(|| format!("Invalid ignore pattern '{}'", pattern))?;
            }
            Some(builder.build()?)
        };

        Ok(())
    }

    fn load_ignore_file(&self, name: &str) -> Result<Option<Gitignore>> {
        let path = self.root.join(name);
        if !path.exists() {
            return Ok(None);
        }

        let mut builder = GitignoreBuilder::new(&self.root);
        if let Some(e) = builder.add(&path) {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
        Ok(Some(builder.build()?))
    }

    /// Check if a root-relative path should be skipped
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        if is_builtin_ignored(path) {
            return true;
        }

        let matchers = [&self.quiesceignore, &self.gitignore, &self.extra];
        for matcher in matchers.into_iter().flatten() {
            let matched = matcher.matched_path_or_any_parents(path, is_dir);
            if matched.is_whitelist() {
                return false;
            }
            if matched.is_ignore() {
                return true;
            }
        }

        false
    }

    /// Whether `path` names a project manifest
    pub fn is_project_manifest(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .map(|name| self.config.project_manifests.iter().any(|m| m == name))
            .unwrap_or(false)
    }

    /// Get number of active ignore sources
    pub fn active_sources(&self) -> usize {
        1 + [&self.gitignore, &self.quiesceignore, &self.extra]
            .iter()
            .filter(|m| m.is_some())
            .count()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Built-in directories and editor scratch files
fn is_builtin_ignored(path: &Path) -> bool {
    for component in path.components() {
        if let Component::Normal(name) = component {
            if let Some(name) = name.to_str() {
                if BUILTIN_DIRS.contains(&name) {
                    return true;
                }
            }
        }
    }

    let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

    // Vim swap files
    if [".swp", ".swo", ".swx"].iter().any(|ext| filename.ends_with(ext)) {
        return true;
    }

    // Backup files, Emacs auto-save and lock files
    if filename.ends_with('~')
        || (filename.starts_with('#') && filename.ends_with('#'))
        || filename.starts_with(".#")
    {
        return true;
    }

    // Atomic-save temporaries and OS droppings
    filename.ends_with(".tmp")
        || filename == ".DS_Store"
        || filename.starts_with("._")
        || filename == "Thumbs.db"
}
