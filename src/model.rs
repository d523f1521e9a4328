use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Stable key naming one open document (a URI)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Url);

impl DocumentId {
    pub fn new(uri: Url) -> Self {
        Self(uri)
    }

    /// Parse a URI string such as `file:///work/module.py`
    pub fn parse(uri: &str) -> anyhow::Result<Self> {
        let url = Url::parse(uri).map_err(|e| anyhow::anyhow!("Invalid document URI {uri:?}: {e}"))?;
        Ok(Self(url))
    }

    /// Build a `file://` identity from a filesystem path (made absolute first)
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let url = Url::from_file_path(&absolute)
            .map_err(|_| anyhow::anyhow!("Cannot build a file URI from {}", absolute.display()))?;
        Ok(Self(url))
    }

    pub fn uri(&self) -> &Url {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<Url> for DocumentId {
    fn from(uri: Url) -> Self {
        Self(uri)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// Per-document edit counter. Open yields the baseline, each change adds one.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    pub const BASELINE: Version = Version(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Content of a document as read at one version.
///
/// `generation` tells apart successive open/close lifetimes of the same
/// identity, so work read from a closed document cannot land in a re-opened one.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
    pub id: DocumentId,
    pub content: Arc<str>,
    pub version: Version,
    pub generation: u64,
}

/// Output of the analysis function for one document version
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult<P> {
    pub id: DocumentId,
    pub version: Version,
    pub payload: P,
    pub computed_at: DateTime<Utc>,
}

/// Severity of a lifecycle/log event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Log,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Log => "log",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error" => Ok(Severity::Error),
            "warning" => Ok(Severity::Warning),
            "info" => Ok(Severity::Info),
            "log" => Ok(Severity::Log),
            _ => Err(()),
        }
    }
}

/// Notification handed to an `EventSink`
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEvent {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// JSON output for the analyze command
#[derive(Debug, Serialize)]
pub struct AnalysisReport<P> {
    pub document: DocumentId,
    pub version: Version,
    pub computed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<P>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
