//! Key equality policies for coalescing
//!
//! A policy decides which notifications collapse into one pending entry.
//! The same policy key is used for the "already pending" check, for
//! insertion and for removal, so the one-timer-per-key guarantee holds.

use crate::event::{ChangeKey, ChangeKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::path::Path;
use std::sync::Arc;

/// Strategy mapping a change identity to its coalescing key
pub trait KeyPolicy: Send + Sync + 'static {
    /// Key stored in the pending set
    type Key: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static;

    /// Derive the pending-set key for a change
    fn pending_key(&self, key: &ChangeKey) -> Self::Key;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Coalesce on the subject path alone
///
/// All kinds for one path collapse, and the last kind wins. An add
/// followed by a remove within one window emits a single removal.
#[derive(Debug, Clone, Copy, Default)]
pub struct BySubject;

impl KeyPolicy for BySubject {
    type Key = Arc<Path>;

    fn pending_key(&self, key: &ChangeKey) -> Self::Key {
        Arc::clone(&key.subject)
    }

    fn name(&self) -> &'static str {
        "subject"
    }
}

/// Coalesce on the subject path and change kind
///
/// Different kinds for one path are independent streams and are not
/// ordered relative to each other.
#[derive(Debug, Clone, Copy, Default)]
pub struct BySubjectAndKind;

impl KeyPolicy for BySubjectAndKind {
    type Key = ChangeKey;

    fn pending_key(&self, key: &ChangeKey) -> Self::Key {
        key.clone()
    }

    fn name(&self) -> &'static str {
        "subject-and-kind"
    }
}

/// Policy selected at runtime (from configuration or the command line)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyPolicyKind {
    #[default]
    Subject,
    SubjectAndKind,
}

impl KeyPolicy for KeyPolicyKind {
    type Key = (Arc<Path>, Option<ChangeKind>);

    fn pending_key(&self, key: &ChangeKey) -> Self::Key {
        match self {
            KeyPolicyKind::Subject => (Arc::clone(&key.subject), None),
            KeyPolicyKind::SubjectAndKind => (Arc::clone(&key.subject), Some(key.kind)),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            KeyPolicyKind::Subject => BySubject.name(),
            KeyPolicyKind::SubjectAndKind => BySubjectAndKind.name(),
        }
    }
}

impl std::str::FromStr for KeyPolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subject" => Ok(KeyPolicyKind::Subject),
            "subject-and-kind" => Ok(KeyPolicyKind::SubjectAndKind),
            other => Err(format!(
                "unknown key policy '{}' (expected 'subject' or 'subject-and-kind')",
                other
            )),
        }
    }
}

impl fmt::Display for KeyPolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
