//! Filesystem change source
//!
//! Turns raw `notify` events into document/project change notices:
//! - Paths are filtered through [`PathFilter`]
//! - Manifests become project changes, everything else document changes
//! - A per-path version stamp (mtime + size) suppresses no-op events and
//!   lets removals report the last known version
//! - Watcher overflow triggers a full rescan against the version cache

use crate::feed::{ChangeFeed, ChangeNotice};
use crate::filter::PathFilter;
use anyhow::{Context, Result};
use dashmap::DashMap;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use quiesce_core::{ChangeCategory, ChangeKey, ChangeKind, EntityKind, Snapshot};
use std::collections::HashSet;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

/// Watches a directory tree and publishes change notices into a feed
pub struct FsChangeSource {
    /// Keeps the OS watch alive
    _watcher: RecommendedWatcher,

    classifier: Arc<Classifier>,
}

impl FsChangeSource {
    /// Start watching `root` recursively
    ///
    /// Walks the tree once to learn current versions before the watch
    /// starts, so the first change to an existing file is reported as a
    /// change rather than an addition.
    pub fn start(root: &Path, filter: PathFilter, feed: ChangeFeed) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("Cannot watch {}", root.display()))?;

        let classifier = Arc::new(Classifier {
            root: root.clone(),
            filter,
            versions: DashMap::new(),
            feed,
        });
        let tracked = classifier.prime();
        info!("Tracking {} files under {}", tracked, root.display());

        let handler = Arc::clone(&classifier);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => handler.handle(event),
            Err(e) => warn!("File watcher error: {}", e),
        })
        .context("Failed to create file watcher")?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", root.display()))?;

        Ok(Self {
            _watcher: watcher,
            classifier,
        })
    }

    /// Canonical root being watched
    pub fn root(&self) -> &Path {
        &self.classifier.root
    }

    /// Number of files with a known version
    pub fn tracked_count(&self) -> usize {
        self.classifier.versions.len()
    }

    /// Re-scan the tree and publish whatever the watcher missed
    pub fn rescan(&self) -> usize {
        self.classifier.rescan()
    }
}

/// Version stamp of a file: modification time and size
fn version_stamp(meta: &Metadata) -> String {
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{:x}-{:x}", mtime, meta.len())
}

/// Maps paths to notices; shared with the watcher callback thread
struct Classifier {
    root: PathBuf,
    filter: PathFilter,

    /// Absolute path -> last observed version stamp
    versions: DashMap<PathBuf, String>,

    feed: ChangeFeed,
}

impl Classifier {
    fn handle(&self, event: Event) {
        if event.need_rescan() {
            warn!("File watcher overflowed, rescanning {}", self.root.display());
            self.rescan();
            return;
        }

        match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                event.paths.iter().for_each(|p| self.removed(p));
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
                self.removed(&event.paths[0]);
                self.present(&event.paths[1]);
            }
            EventKind::Create(_) | EventKind::Modify(_) => {
                event.paths.iter().for_each(|p| self.present(p));
            }
            EventKind::Remove(_) => {
                event.paths.iter().for_each(|p| self.removed(p));
            }
            EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
        }
    }

    /// Root-relative path, or `None` for paths outside the root
    fn relative<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        path.strip_prefix(&self.root).ok()
    }

    fn entity_of(&self, path: &Path) -> EntityKind {
        if self.filter.is_project_manifest(path) {
            EntityKind::Project
        } else {
            EntityKind::Document
        }
    }

    /// A path that should exist now (created, modified, renamed into place)
    fn present(&self, path: &Path) {
        let meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            // Gone again before we looked
            Err(_) => return self.removed(path),
        };

        let Some(relative) = self.relative(path) else {
            return;
        };
        if self.filter.is_ignored(relative, meta.is_dir()) {
            trace!("Ignoring {}", relative.display());
            return;
        }

        if meta.is_dir() {
            // Files inside a new directory may predate its watch
            for entry in self.walk(path) {
                self.present(&entry);
            }
            return;
        }

        let stamp = version_stamp(&meta);
        let category = match self.versions.insert(path.to_path_buf(), stamp.clone()) {
            None => ChangeCategory::Added,
            Some(previous) if previous == stamp => return,
            Some(_) => ChangeCategory::Changed,
        };
        self.publish(path, category, Some(stamp));
    }

    /// A path that no longer exists (file or whole directory)
    fn removed(&self, path: &Path) {
        if let Some((_, stamp)) = self.versions.remove(path) {
            self.publish(path, ChangeCategory::Removed, Some(stamp));
            return;
        }

        let descendants: Vec<PathBuf> = self
            .versions
            .iter()
            .filter(|entry| entry.key().starts_with(path))
            .map(|entry| entry.key().clone())
            .collect();
        for child in descendants {
            if let Some((_, stamp)) = self.versions.remove(&child) {
                self.publish(&child, ChangeCategory::Removed, Some(stamp));
            }
        }
    }

    fn publish(&self, path: &Path, category: ChangeCategory, version: Option<String>) {
        let kind = ChangeKind::new(self.entity_of(path), category);
        let snapshot = match version {
            Some(version) => Snapshot::with_version(version),
            None => Snapshot::new(),
        };

        trace!("{} {}", kind, path.display());
        self.feed.publish(ChangeNotice::new(ChangeKey::new(path, kind), snapshot));
    }

    /// Unignored files under `dir`
    fn walk(&self, dir: &Path) -> Vec<PathBuf> {
        WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                self.relative(e.path())
                    .map(|rel| rel.as_os_str().is_empty() || !self.filter.is_ignored(rel, e.file_type().is_dir()))
                    .unwrap_or(false)
            })
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect()
    }

    /// Record current versions without publishing
    fn prime(&self) -> usize {
        for path in self.walk(&self.root) {
            if let Ok(meta) = std::fs::metadata(&path) {
                self.versions.insert(path, version_stamp(&meta));
            }
        }
        self.versions.len()
    }

    /// Compare the tree with the version cache and publish differences
    ///
    /// Files whose version moved are reported as reloaded.
    fn rescan(&self) -> usize {
        let mut seen = HashSet::new();
        let mut published = 0;

        for path in self.walk(&self.root) {
            let Ok(meta) = std::fs::metadata(&path) else {
                continue;
            };
            let stamp = version_stamp(&meta);
            seen.insert(path.clone());

            let category = match self.versions.insert(path.clone(), stamp.clone()) {
                None => ChangeCategory::Added,
                Some(previous) if previous == stamp => continue,
                Some(_) => ChangeCategory::Reloaded,
            };
            self.publish(&path, category, Some(stamp));
            published += 1;
        }

        let vanished: Vec<PathBuf> = self
            .versions
            .iter()
            .filter(|entry| !seen.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        for path in vanished {
            if let Some((_, stamp)) = self.versions.remove(&path) {
                self.publish(&path, ChangeCategory::Removed, Some(stamp));
                published += 1;
            }
        }

        debug!("Rescan published {} changes", published);
        published
    }
}
