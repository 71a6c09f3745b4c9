//! Payload resolution for emitted events
//!
//! A resolver turns a coalesced key into the body of its event. Absence
//! of information is a valid answer (`Ok(None)` or null sub-fields), not
//! an error; an `Err` drops that one emission.

use crate::event::{ChangeKey, EntityKind, Snapshot};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

/// Produces the payload for a key whose window has elapsed
#[async_trait]
pub trait PayloadResolver: Send + Sync {
    async fn resolve(&self, key: &ChangeKey, snapshot: &Snapshot) -> Result<Option<Value>>;
}

/// Resolver that never attaches a payload
#[derive(Debug, Clone, Copy, Default)]
pub struct NullResolver;

#[async_trait]
impl PayloadResolver for NullResolver {
    async fn resolve(&self, _key: &ChangeKey, _snapshot: &Snapshot) -> Result<Option<Value>> {
        Ok(None)
    }
}

/// One independent source of project metadata
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Field name of this provider in the payload (e.g. "Cargo")
    fn name(&self) -> &'static str;

    /// Describe the project at `subject`, or `None` if this provider
    /// knows nothing about it
    async fn describe(&self, subject: &Path) -> Result<Option<Value>>;
}

/// Resolves project events against every registered provider
///
/// The payload is an object with one field per provider; providers
/// without information contribute `null`. Document events get no payload.
#[derive(Clone, Default)]
pub struct ProjectResolver {
    providers: Vec<Arc<dyn MetadataProvider>>,
}

impl ProjectResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: Arc<dyn MetadataProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }
}

#[async_trait]
impl PayloadResolver for ProjectResolver {
    async fn resolve(&self, key: &ChangeKey, _snapshot: &Snapshot) -> Result<Option<Value>> {
        if key.kind.entity() != EntityKind::Project {
            return Ok(None);
        }

        let mut body = Map::new();
        for provider in &self.providers {
            let info = provider.describe(&key.subject).await.with_context(|| {
                format!(
                    "{} metadata lookup failed for {}",
                    provider.name(),
                    key.subject.display()
                )
            })?;
            body.insert(provider.name().to_string(), info.unwrap_or(Value::Null));
        }

        Ok(Some(Value::Object(body)))
    }
}
