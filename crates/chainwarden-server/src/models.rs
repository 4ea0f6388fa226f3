//! Request and response models.

use serde::{Deserialize, Serialize};

/// Block report posted by the proxy to `/block`.
///
/// Two wire shapes are accepted; neither carries a tag.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum BlockEvent {
    /// `{ts_ms, artifact: {product, identifier, version?}}`
    Artifact(ArtifactReport),
    /// `{product, package_name, package_version?, reason?}`
    Legacy(LegacyReport),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ArtifactReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts_ms: Option<i64>,
    pub artifact: Artifact,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Artifact {
    pub product: String,
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LegacyReport {
    pub product: String,
    pub package_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The blocked package a report refers to, whatever its wire shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedPackage {
    pub product: String,
    pub package_name: String,
    pub package_version: Option<String>,
}

impl BlockEvent {
    pub fn package(&self) -> BlockedPackage {
        match self {
            BlockEvent::Artifact(report) => BlockedPackage {
                product: report.artifact.product.clone(),
                package_name: report.artifact.identifier.clone(),
                package_version: report.artifact.version.clone(),
            },
            BlockEvent::Legacy(report) => BlockedPackage {
                product: report.product.clone(),
                package_name: report.package_name.clone(),
                package_version: report.package_version.clone(),
            },
        }
    }
}

/// A stored block, as served to and pushed to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedEvent {
    pub id: String,
    /// RFC 3339 local time the report was received.
    pub ts: String,
    /// Ecosystem, e.g. `npm`, `pypi`, `vscode`.
    pub product: String,
    #[serde(rename = "identifier")]
    pub package_name: String,
    #[serde(
        rename = "version",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub package_version: Option<String>,
    pub bypass_enabled: bool,
}

/// Optional body of `POST /v1/events/{id}/request-access`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestAccessBody {
    #[serde(default)]
    pub message: Option<String>,
}

/// Proxy status pushed to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyStatus {
    pub running: bool,
}
