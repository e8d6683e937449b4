use crate::archivist::append_log::AppendLogWriter;
use crate::archivist::paths::ArchivistPaths;
use crate::archivist::record::is_blank;
use crate::remote::Entity;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Walk {
    History,
    Stories,
}

impl Walk {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::History => "history",
            Self::Stories => "stories",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkStatus {
    Ok,
    Failed,
}

impl WalkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
        }
    }
}

/// One finished walker run over one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkEntry {
    pub at: DateTime<Utc>,
    pub walk: Walk,
    pub status: WalkStatus,
    pub entity_id: i64,
    pub entity_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WalkEntry {
    pub fn finished<T: Serialize>(walk: Walk, entity: &Entity, outcome: &T) -> Result<Self> {
        Ok(Self {
            at: Utc::now(),
            walk,
            status: WalkStatus::Ok,
            entity_id: entity.id,
            entity_title: entity.title.clone(),
            outcome: Some(serde_json::to_value(outcome)?),
            error: None,
        })
    }

    pub fn failed(walk: Walk, entity: &Entity, err: &anyhow::Error) -> Self {
        Self {
            at: Utc::now(),
            walk,
            status: WalkStatus::Failed,
            entity_id: entity.id,
            entity_title: entity.title.clone(),
            outcome: None,
            error: Some(format!("{err:#}")),
        }
    }
}

/// Per-run ledger at `{logs}/audit.log`, one JSON line per walker run.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(paths: &ArchivistPaths) -> Self {
        Self {
            path: paths.logs_dir.join("audit.log"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, entry: &WalkEntry) -> Result<()> {
        AppendLogWriter::open(&self.path)?.append(entry)
    }

    /// Most recent complete entry, if the ledger has one.
    pub fn latest(&self) -> Result<Option<WalkEntry>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", self.path.display()));
            }
        };
        let complete = match raw.rfind('\n') {
            Some(end) => &raw[..end],
            None => return Ok(None),
        };
        let Some(line) = complete.lines().rev().find(|line| !is_blank(line.as_bytes())) else {
            return Ok(None);
        };
        let entry = serde_json::from_str(line)
            .with_context(|| format!("failed to decode last entry of {}", self.path.display()))?;
        Ok(Some(entry))
    }
}
