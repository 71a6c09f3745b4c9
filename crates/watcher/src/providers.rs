//! Project metadata providers
//!
//! Each provider understands one manifest format. A provider asked about a
//! file it does not own, or about a manifest that no longer exists, answers
//! `None`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use quiesce_core::MetadataProvider;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;

/// Read a manifest, mapping "not found" to `None`
async fn read_manifest(subject: &Path, file_name: &str) -> Result<Option<String>> {
    if subject.file_name().and_then(|n| n.to_str()) != Some(file_name) {
        return Ok(None);
    }

    match tokio::fs::read_to_string(subject).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", subject.display())),
    }
}

/// Describes Cargo packages and workspaces from `Cargo.toml`
#[derive(Debug, Clone, Copy, Default)]
pub struct CargoManifestProvider;

#[derive(Deserialize)]
struct CargoManifest {
    package: Option<CargoPackage>,
    workspace: Option<CargoWorkspace>,
    #[serde(default)]
    dependencies: BTreeMap<String, toml::Value>,
}

#[derive(Deserialize)]
struct CargoPackage {
    name: String,
    version: Option<toml::Value>,
    edition: Option<toml::Value>,
}

#[derive(Deserialize)]
struct CargoWorkspace {
    #[serde(default)]
    members: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CargoProject {
    path: String,
    name: Option<String>,
    version: Option<String>,
    edition: Option<String>,
    workspace_members: Vec<String>,
    dependencies: Vec<String>,
}

/// `version.workspace = true` and friends are reported as "workspace"
fn inherited_or_string(value: Option<toml::Value>) -> Option<String> {
    match value? {
        toml::Value::String(s) => Some(s),
        toml::Value::Table(_) => Some("workspace".to_string()),
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl MetadataProvider for CargoManifestProvider {
    fn name(&self) -> &'static str {
        "Cargo"
    }

    async fn describe(&self, subject: &Path) -> Result<Option<Value>> {
        let Some(text) = read_manifest(subject, "Cargo.toml").await? else {
            return Ok(None);
        };
        let manifest: CargoManifest = toml::from_str(&text)
            .with_context(|| format!("Failed to parse {}", subject.display()))?;

        let (name, version, edition) = match manifest.package {
            Some(package) => (
                Some(package.name),
                inherited_or_string(package.version),
                inherited_or_string(package.edition),
            ),
            None => (None, None, None),
        };

        let project = CargoProject {
            path: subject.to_string_lossy().into_owned(),
            name,
            version,
            edition,
            workspace_members: manifest.workspace.map(|w| w.members).unwrap_or_default(),
            dependencies: manifest.dependencies.into_keys().collect(),
        };
        Ok(Some(serde_json::to_value(project)?))
    }
}

/// Describes npm packages from `package.json`
#[derive(Debug, Clone, Copy, Default)]
pub struct NpmManifestProvider;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageJson {
    name: Option<String>,
    version: Option<String>,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    scripts: BTreeMap<String, String>,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default)]
    dev_dependencies: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct NpmProject {
    path: String,
    name: Option<String>,
    version: Option<String>,
    private: bool,
    scripts: Vec<String>,
    dependencies: Vec<String>,
    dev_dependencies: Vec<String>,
}

#[async_trait]
impl MetadataProvider for NpmManifestProvider {
    fn name(&self) -> &'static str {
        "Npm"
    }

    async fn describe(&self, subject: &Path) -> Result<Option<Value>> {
        let Some(text) = read_manifest(subject, "package.json").await? else {
            return Ok(None);
        };
        let package: PackageJson = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse {}", subject.display()))?;

        let project = NpmProject {
            path: subject.to_string_lossy().into_owned(),
            name: package.name,
            version: package.version,
            private: package.private,
            scripts: package.scripts.into_keys().collect(),
            dependencies: package.dependencies.into_keys().collect(),
            dev_dependencies: package.dev_dependencies.into_keys().collect(),
        };
        Ok(Some(serde_json::to_value(project)?))
    }
}
