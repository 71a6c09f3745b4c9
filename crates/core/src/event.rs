//! Change notifications and emitted workspace events

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

/// Class of entity a change applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// A single source document
    Document,
    /// A project manifest
    Project,
}

/// What happened to an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeCategory {
    Added,
    Changed,
    Reloaded,
    Removed,
}

/// Kind of workspace change, as reported on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    DocumentAdded,
    DocumentChanged,
    DocumentReloaded,
    DocumentRemoved,
    ProjectAdded,
    ProjectChanged,
    ProjectReloaded,
    ProjectRemoved,
}

impl ChangeKind {
    /// Build a kind from its entity and category
    pub fn new(entity: EntityKind, category: ChangeCategory) -> Self {
        use ChangeCategory::*;
        use EntityKind::*;

        match (entity, category) {
            (Document, Added) => ChangeKind::DocumentAdded,
            (Document, Changed) => ChangeKind::DocumentChanged,
            (Document, Reloaded) => ChangeKind::DocumentReloaded,
            (Document, Removed) => ChangeKind::DocumentRemoved,
            (Project, Added) => ChangeKind::ProjectAdded,
            (Project, Changed) => ChangeKind::ProjectChanged,
            (Project, Reloaded) => ChangeKind::ProjectReloaded,
            (Project, Removed) => ChangeKind::ProjectRemoved,
        }
    }

    pub fn entity(self) -> EntityKind {
        match self {
            ChangeKind::DocumentAdded
            | ChangeKind::DocumentChanged
            | ChangeKind::DocumentReloaded
            | ChangeKind::DocumentRemoved => EntityKind::Document,
            ChangeKind::ProjectAdded
            | ChangeKind::ProjectChanged
            | ChangeKind::ProjectReloaded
            | ChangeKind::ProjectRemoved => EntityKind::Project,
        }
    }

    pub fn category(self) -> ChangeCategory {
        match self {
            ChangeKind::DocumentAdded | ChangeKind::ProjectAdded => ChangeCategory::Added,
            ChangeKind::DocumentChanged | ChangeKind::ProjectChanged => ChangeCategory::Changed,
            ChangeKind::DocumentReloaded | ChangeKind::ProjectReloaded => ChangeCategory::Reloaded,
            ChangeKind::DocumentRemoved | ChangeKind::ProjectRemoved => ChangeCategory::Removed,
        }
    }

    /// Removals have nothing left to describe, so they are never resolved
    pub fn is_removal(self) -> bool {
        self.category() == ChangeCategory::Removed
    }

    /// Wire name of this kind (e.g. "ProjectChanged")
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::DocumentAdded => "DocumentAdded",
            ChangeKind::DocumentChanged => "DocumentChanged",
            ChangeKind::DocumentReloaded => "DocumentReloaded",
            ChangeKind::DocumentRemoved => "DocumentRemoved",
            ChangeKind::ProjectAdded => "ProjectAdded",
            ChangeKind::ProjectChanged => "ProjectChanged",
            ChangeKind::ProjectReloaded => "ProjectReloaded",
            ChangeKind::ProjectRemoved => "ProjectRemoved",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a change target: the subject path and what happened to it
///
/// How much of this identity participates in coalescing is decided by a
/// [`KeyPolicy`](crate::key::KeyPolicy).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeKey {
    /// Path of the document or project manifest (interned)
    pub subject: Arc<Path>,
    /// Kind of change
    pub kind: ChangeKind,
}

impl ChangeKey {
    pub fn new(subject: impl AsRef<Path>, kind: ChangeKind) -> Self {
        Self {
            subject: Arc::from(subject.as_ref()),
            kind,
        }
    }
}

/// Latest payload-relevant state captured for a key
///
/// Replaced wholesale on every notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Version stamp of the subject, if the source knows one
    pub version: Option<String>,
    /// When the change source observed the change
    pub observed_at: SystemTime,
}

impl Snapshot {
    pub fn new() -> Self {
        Self {
            version: None,
            observed_at: SystemTime::now(),
        }
    }

    pub fn with_version(version: impl Into<String>) -> Self {
        Self {
            version: Some(version.into()),
            observed_at: SystemTime::now(),
        }
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// A finished, immutable event handed to a sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkspaceEvent {
    pub kind: ChangeKind,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl WorkspaceEvent {
    pub fn new(key: &ChangeKey, snapshot: &Snapshot, payload: Option<serde_json::Value>) -> Self {
        Self {
            kind: key.kind,
            file_name: key.subject.to_string_lossy().into_owned(),
            version_id: snapshot.version.clone(),
            payload,
        }
    }
}
